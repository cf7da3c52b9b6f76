//! Headless-browser listing renderer. Scrolls the page and keeps pressing the
//! "More" control until every entry for the date is loaded.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tipwatch_storage::PacingWindow;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::render::{ListingRenderer, RenderError, CONTENT_MARKER};

const LOAD_MORE_SCRIPT: &str = r#"
(() => {
    const more = Array.from(document.querySelectorAll('#mrows span'))
        .find((s) => s.textContent.trim() === 'More');
    if (!more || more.offsetParent === null) {
        return false;
    }
    more.scrollIntoView({ block: 'center' });
    more.click();
    return true;
})()
"#;

#[derive(Debug, Clone)]
pub struct BrowserRendererConfig {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub marker_timeout: Duration,
    pub max_load_more_clicks: usize,
    pub click_pacing: PacingWindow,
    pub scroll_pause: Duration,
    /// Written when the marker never appears.
    pub failure_screenshot: Option<PathBuf>,
}

impl Default for BrowserRendererConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            marker_timeout: Duration::from_secs(20),
            max_load_more_clicks: 20,
            click_pacing: PacingWindow::new(Duration::from_millis(1500), Duration::from_millis(3000)),
            scroll_pause: Duration::from_millis(500),
            failure_screenshot: Some(PathBuf::from("listing_failure.png")),
        }
    }
}

fn browser_err(err: impl std::fmt::Display) -> RenderError {
    RenderError::Browser(err.to_string())
}

pub struct BrowserListingRenderer {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    config: BrowserRendererConfig,
}

impl BrowserListingRenderer {
    pub async fn launch(config: BrowserRendererConfig) -> Result<Self, RenderError> {
        let mut builder = BrowserConfig::builder();
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }
        builder = builder
            .window_size(1920, 1080)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        let browser_config = builder.build().map_err(RenderError::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(browser_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            config,
        })
    }

    pub async fn close(self) {
        let mut browser = self.browser.into_inner();
        if let Err(err) = browser.close().await {
            warn!(error = %err, "browser close failed");
        }
        self.handler.abort();
    }

    async fn wait_for_marker(&self, page: &Page) -> bool {
        let deadline = Instant::now() + self.config.marker_timeout;
        loop {
            if page.find_element(CONTENT_MARKER).await.is_ok() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(500)).await;
        }
    }

    async fn scroll_to_bottom(&self, page: &Page) -> Result<(), RenderError> {
        let mut position: i64 = 0;
        loop {
            let height: i64 = eval(page, "document.body.scrollHeight").await?;
            if position >= height {
                return Ok(());
            }
            let viewport: i64 = eval(page, "window.innerHeight").await?;
            page.evaluate(format!("window.scrollTo(0, {position})"))
                .await
                .map_err(browser_err)?;
            position += (viewport * 7 / 10).max(1);
            sleep(self.config.scroll_pause).await;
        }
    }

    async fn load_all_entries(&self, page: &Page) -> Result<usize, RenderError> {
        let mut clicks = 0;
        while clicks < self.config.max_load_more_clicks {
            let clicked: bool = eval(page, LOAD_MORE_SCRIPT).await?;
            if !clicked {
                break;
            }
            clicks += 1;
            debug!(clicks, "load more pressed");
            sleep(self.config.click_pacing.draw()).await;
        }
        Ok(clicks)
    }

    async fn save_failure_screenshot(&self, page: &Page) {
        let Some(path) = &self.config.failure_screenshot else {
            return;
        };
        let params = ScreenshotParams::builder().full_page(true).build();
        match page.save_screenshot(params, path).await {
            Ok(_) => info!(path = %path.display(), "failure screenshot saved"),
            Err(err) => warn!(error = %err, "failure screenshot not saved"),
        }
    }

    async fn render_page(&self, page: &Page, url: &str) -> Result<String, RenderError> {
        if !self.wait_for_marker(page).await {
            self.save_failure_screenshot(page).await;
            return Err(RenderError::MarkerMissing {
                url: url.to_string(),
                marker: CONTENT_MARKER,
            });
        }
        self.scroll_to_bottom(page).await?;
        let clicks = self.load_all_entries(page).await?;
        let html = page.content().await.map_err(browser_err)?;
        info!(url, clicks, bytes = html.len(), "listing rendered");
        Ok(html)
    }
}

async fn eval<T: serde::de::DeserializeOwned>(page: &Page, script: &str) -> Result<T, RenderError> {
    page.evaluate(script)
        .await
        .map_err(browser_err)?
        .into_value()
        .map_err(browser_err)
}

#[async_trait]
impl ListingRenderer for BrowserListingRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page(url).await.map_err(browser_err)?
        };
        let result = self.render_page(&page, url).await;
        if let Err(err) = page.close().await {
            debug!(error = %err, "page close failed");
        }
        result
    }
}
