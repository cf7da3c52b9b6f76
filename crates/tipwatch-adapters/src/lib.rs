//! Source adapter for the prediction site: listing rendering plus listing and detail extraction.

use chrono::{Days, NaiveDate};
use thiserror::Error;

#[cfg(feature = "browser")]
pub mod browser;
pub mod extract;
pub mod render;

#[cfg(feature = "browser")]
pub use browser::{BrowserListingRenderer, BrowserRendererConfig};
pub use extract::{DetailExtractor, EntryRejection, ListingExtractor, STAT_MIN_CELLS};
pub use render::{HttpListingRenderer, ListingRenderer, RenderError, CONTENT_MARKER};

pub const CRATE_NAME: &str = "tipwatch-adapters";

const LISTING_PATH: &str = "en/football-predictions/predictions-1x2";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
}

/// Listing page for one calendar date, e.g. `{base}/en/football-predictions/predictions-1x2/2025-03-01`.
pub fn listing_url_for(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/{LISTING_PATH}/{}",
        base_url.trim_end_matches('/'),
        date.format("%Y-%m-%d")
    )
}

/// `start` followed by the next `days_ahead` dates.
pub fn harvest_dates(start: NaiveDate, days_ahead: u32) -> Vec<NaiveDate> {
    (0..=u64::from(days_ahead))
        .filter_map(|offset| start.checked_add_days(Days::new(offset)))
        .collect()
}
