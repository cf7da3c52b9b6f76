//! Paced, retrying HTTP fetch for match detail pages.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{error, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    Message(String),
}

/// Single outbound GET. Implementations must be safe to share across workers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        Ok(TransportResponse {
            status,
            final_url,
            body,
        })
    }
}

/// Uniform random politeness delay drawn before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingWindow {
    pub min: Duration,
    pub max: Duration,
}

impl PacingWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn draw(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        if lo >= hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

impl Default for PacingWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(7))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub retry_increment: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_increment: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// Linear backoff: attempt `n` (1-based) waits `n * retry_increment`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.retry_increment.saturating_mul(factor)
    }

    pub fn attempts(&self) -> usize {
        self.max_retries.max(1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchPolicy {
    pub pacing: PacingWindow,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
    pub attempts: usize,
}

impl FetchedPage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of a paced fetch. Exhaustion is an expected outcome, not an error.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedPage),
    Exhausted { attempts: usize, last_failure: String },
}

impl FetchOutcome {
    pub fn into_page(self) -> Option<FetchedPage> {
        match self {
            Self::Fetched(page) => Some(page),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Appends a `_cb=<unix seconds>` query parameter, keeping any fragment last.
pub fn with_cache_buster(url: &str, now: DateTime<Utc>) -> String {
    let (head, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };
    let sep = if head.contains('?') { '&' } else { '?' };
    let mut out = format!("{head}{sep}_cb={}", now.timestamp());
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[derive(Debug)]
pub struct PoliteFetcher<T = ReqwestTransport> {
    transport: T,
    policy: FetchPolicy,
}

impl<T: Transport> PoliteFetcher<T> {
    pub fn new(transport: T, policy: FetchPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn fetch_with_retries(&self, url: &str) -> FetchOutcome {
        let max_attempts = self.policy.backoff.attempts();
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.policy.pacing.draw()).await;
            let target = with_cache_buster(url, Utc::now());

            match self.transport.get(&target).await {
                Ok(resp) if resp.status == 200 => {
                    return FetchOutcome::Fetched(FetchedPage {
                        status: resp.status,
                        final_url: resp.final_url,
                        body: resp.body,
                        attempts: attempt,
                    });
                }
                Ok(resp) => {
                    last_failure = format!("http status {}", resp.status);
                    warn!(attempt, max_attempts, status = resp.status, "detail fetch returned non-200");
                }
                Err(err) => {
                    last_failure = err.to_string();
                    warn!(attempt, max_attempts, error = %err, "detail fetch attempt failed");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.backoff.delay_for_attempt(attempt)).await;
            }
        }

        error!(attempts = max_attempts, %last_failure, "detail fetch exhausted retries");
        FetchOutcome::Exhausted {
            attempts: max_attempts,
            last_failure,
        }
    }
}

#[async_trait]
impl<T: Transport> PageFetcher for PoliteFetcher<T> {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let span = info_span!("detail_fetch", url);
        self.fetch_with_retries(url).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    struct ScriptedTransport {
        statuses: Mutex<VecDeque<Result<u16, String>>>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<u16, String>>) -> Self {
            Self {
                statuses: Mutex::new(script.into()),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
            self.requested.lock().expect("lock").push(url.to_string());
            let next = self
                .statuses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(500));
            match next {
                Ok(status) => Ok(TransportResponse {
                    status,
                    final_url: url.to_string(),
                    body: b"<html>detail</html>".to_vec(),
                }),
                Err(message) => Err(TransportError::Message(message)),
            }
        }
    }

    #[derive(Clone, Default)]
    struct LevelCounter {
        errors: Arc<AtomicUsize>,
        warnings: Arc<AtomicUsize>,
    }

    impl<S: Subscriber> Layer<S> for LevelCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            match *event.metadata().level() {
                Level::ERROR => {
                    self.errors.fetch_add(1, Ordering::SeqCst);
                }
                Level::WARN => {
                    self.warnings.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    fn instant_policy(max_retries: usize) -> FetchPolicy {
        FetchPolicy {
            pacing: PacingWindow::none(),
            backoff: BackoffPolicy {
                max_retries,
                retry_increment: Duration::ZERO,
            },
        }
    }

    #[test]
    fn backoff_is_linear_in_attempt_number() {
        let policy = BackoffPolicy {
            max_retries: 3,
            retry_increment: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(6));
    }

    #[test]
    fn pacing_draw_stays_inside_window() {
        let window = PacingWindow::new(Duration::from_millis(30), Duration::from_millis(10));
        assert_eq!(window.min, Duration::from_millis(10));
        for _ in 0..100 {
            let d = window.draw();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(30));
        }
        assert_eq!(PacingWindow::none().draw(), Duration::ZERO);
    }

    #[test]
    fn cache_buster_respects_existing_query_and_fragment() {
        let now = Utc
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("ts");
        let stamp = now.timestamp();
        assert_eq!(
            with_cache_buster("https://x.test/a", now),
            format!("https://x.test/a?_cb={stamp}")
        );
        assert_eq!(
            with_cache_buster("https://x.test/a?lang=en#top", now),
            format!("https://x.test/a?lang=en&_cb={stamp}#top")
        );
    }

    #[tokio::test]
    async fn retries_until_success() {
        let fetcher = PoliteFetcher::new(
            ScriptedTransport::new(vec![Ok(503), Err("reset".into()), Ok(200)]),
            instant_policy(3),
        );
        let outcome = fetcher.fetch("https://x.test/m/1").await;
        let page = outcome.into_page().expect("third attempt succeeds");
        assert_eq!(page.attempts, 3);
        assert_eq!(page.text(), "<html>detail</html>");

        let requested = fetcher.transport().requested();
        assert_eq!(requested.len(), 3);
        assert!(requested.iter().all(|u| u.starts_with("https://x.test/m/1?_cb=")));
    }

    #[tokio::test]
    async fn exhaustion_logs_one_error_and_returns_sentinel() {
        let counter = LevelCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let fetcher = PoliteFetcher::new(
            ScriptedTransport::new(vec![Ok(500), Ok(500), Ok(500)]),
            instant_policy(3),
        );
        let outcome = fetcher.fetch("https://x.test/m/2").await;

        match outcome {
            FetchOutcome::Exhausted { attempts, last_failure } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_failure, "http status 500");
            }
            FetchOutcome::Fetched(_) => panic!("expected exhaustion"),
        }
        assert_eq!(fetcher.transport().requested().len(), 3);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counter.warnings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let fetcher = PoliteFetcher::new(ScriptedTransport::new(vec![Ok(200)]), instant_policy(0));
        assert!(!fetcher.fetch("https://x.test/m/3").await.is_exhausted());
        assert_eq!(fetcher.transport().requested().len(), 1);
    }
}
