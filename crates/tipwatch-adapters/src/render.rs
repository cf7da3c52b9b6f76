//! Listing page rendering: turns a listing URL into fully loaded HTML.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use tipwatch_storage::Transport;
use tracing::{info, warn};

/// Listing entries carry this class; its absence means the page never rendered.
pub const CONTENT_MARKER: &str = ".rcnt";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("content marker {marker:?} not found on {url}")]
    MarkerMissing { url: String, marker: &'static str },
    #[error("listing request for {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("browser error: {0}")]
    Browser(String),
}

#[async_trait]
pub trait ListingRenderer: Send + Sync {
    /// Returns the page HTML once the content marker is present.
    async fn render(&self, url: &str) -> Result<String, RenderError>;
}

pub(crate) fn contains_marker(html: &str, marker: &Selector) -> bool {
    Html::parse_document(html).select(marker).next().is_some()
}

/// Plain GET renderer. Sees only the first page of entries since nothing runs the
/// "load more" control.
pub struct HttpListingRenderer {
    transport: Arc<dyn Transport>,
    marker: Selector,
}

impl HttpListingRenderer {
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self, crate::AdapterError> {
        let marker = Selector::parse(CONTENT_MARKER).map_err(|e| crate::AdapterError::Selector {
            selector: CONTENT_MARKER.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { transport, marker })
    }
}

#[async_trait]
impl ListingRenderer for HttpListingRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let response = self
            .transport
            .get(url)
            .await
            .map_err(|e| RenderError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if response.status != 200 {
            return Err(RenderError::Request {
                url: url.to_string(),
                message: format!("status {}", response.status),
            });
        }

        let html = String::from_utf8_lossy(&response.body).into_owned();
        if !contains_marker(&html, &self.marker) {
            warn!(url, "listing rendered without entries");
            return Err(RenderError::MarkerMissing {
                url: url.to_string(),
                marker: CONTENT_MARKER,
            });
        }
        info!(url, bytes = html.len(), "listing rendered");
        Ok(html)
    }
}
