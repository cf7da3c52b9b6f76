//! Harvest orchestration: listing dates, batched enrichment, reconciliation and export.

pub mod config;
pub mod export;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;

pub use config::{HarvestConfig, SchedulerConfig, DEFAULT_USER_AGENT};
pub use export::{export_file_name, export_records, export_rows};
pub use pipeline::{HarvestPipeline, HarvestRunSummary, RunOptions};
pub use reconcile::{Reconciler, UpsertTally};
pub use scheduler::{EnrichmentScheduler, ScheduleOutcome};

pub const CRATE_NAME: &str = "tipwatch-sync";
