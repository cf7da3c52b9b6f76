//! Subscriber setup: stdout plus one log file per run.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "tipwatch=info";

pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("tipwatch_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// The returned guard flushes the file writer on drop; keep it alive for the whole process.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let file_name = log_file_name(Local::now());
    let (file_writer, guard) = non_blocking(rolling::never(log_dir, &file_name));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::info!(path = %log_dir.join(&file_name).display(), "logging to file");
    Ok(guard)
}
