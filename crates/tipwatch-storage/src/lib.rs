//! Detail-page fetching and record persistence for tipwatch.

pub mod fetch;
pub mod postgres;
pub mod store;

pub use fetch::{
    with_cache_buster, BackoffPolicy, FetchOutcome, FetchPolicy, FetchedPage, HttpClientConfig,
    PacingWindow, PageFetcher, PoliteFetcher, ReqwestTransport, Transport, TransportError,
    TransportResponse,
};
pub use postgres::{PgRecordStore, DEFAULT_TABLE};
pub use store::{MemoryRecordStore, RecordStore, StoreError, StoredRow, UpsertKey, UpsertOutcome};

pub const CRATE_NAME: &str = "tipwatch-storage";
