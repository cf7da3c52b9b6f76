use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tipwatch_adapters::{harvest_dates, listing_url_for, DetailExtractor, ListingExtractor, ListingRenderer};
use tipwatch_core::MatchRecord;
use tipwatch_storage::{PageFetcher, RecordStore};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::export::export_records;
use crate::reconcile::{Reconciler, UpsertTally};
use crate::scheduler::EnrichmentScheduler;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// First listing date; today (local time) when unset.
    pub start: Option<NaiveDate>,
    pub days_ahead: u32,
    pub export: bool,
}

impl RunOptions {
    pub fn start_date(&self) -> NaiveDate {
        self.start.unwrap_or_else(|| Local::now().date_naive())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dates_requested: usize,
    pub dates_rendered: usize,
    pub summaries: usize,
    pub batches: usize,
    pub degraded: usize,
    pub tally: UpsertTally,
    pub export_path: Option<String>,
}

pub struct HarvestPipeline<S: RecordStore + ?Sized> {
    config: HarvestConfig,
    renderer: Arc<dyn ListingRenderer>,
    listing: ListingExtractor,
    scheduler: EnrichmentScheduler,
    reconciler: Reconciler<S>,
}

impl<S: RecordStore + ?Sized + 'static> HarvestPipeline<S> {
    pub fn new(
        config: HarvestConfig,
        renderer: Arc<dyn ListingRenderer>,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<S>,
    ) -> Result<Self> {
        let listing = ListingExtractor::new(config.base_url.clone())?;
        let detail = Arc::new(DetailExtractor::new()?);
        let scheduler = EnrichmentScheduler::new(fetcher, detail, config.base_url.as_str(), config.scheduler);
        Ok(Self {
            config,
            renderer,
            listing,
            scheduler,
            reconciler: Reconciler::new(store),
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.reconciler.store()
    }

    /// Fails only when the store is unreachable or no listing date could be rendered.
    pub async fn run_once(&self, options: &RunOptions) -> Result<HarvestRunSummary> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id, options)
            .instrument(info_span!("harvest", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid, options: &RunOptions) -> Result<HarvestRunSummary> {
        let started_at = Utc::now();
        let store = self.reconciler.store();
        store
            .health_check()
            .await
            .context("record store unreachable")?;
        if let Err(err) = store.ensure_schema().await {
            warn!(error = %err, "schema provisioning failed; continuing with existing table");
        }

        let start = options.start_date();
        let dates = harvest_dates(start, options.days_ahead);
        let mut records: Vec<MatchRecord> = Vec::new();
        let mut tally = UpsertTally::default();
        let mut dates_rendered = 0usize;
        let mut summaries = 0usize;
        let mut batches = 0usize;
        let mut degraded = 0usize;

        for (idx, date) in dates.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.config.date_pause.draw()).await;
            }
            let url = listing_url_for(&self.config.base_url, *date);
            let html = match self.renderer.render(&url).await {
                Ok(html) => html,
                Err(err) => {
                    error!(%date, error = %err, "listing render failed; skipping date");
                    continue;
                }
            };
            dates_rendered += 1;

            let found = self.listing.extract_summaries(&html);
            info!(%date, summaries = found.len(), "listing extracted");
            summaries += found.len();

            let outcome = self.scheduler.run(found, &self.reconciler).await;
            tally += outcome.tally;
            batches += outcome.batches;
            degraded += outcome.degraded;
            records.extend(outcome.records);
        }

        if dates_rendered == 0 {
            bail!("no listing page could be rendered for {} date(s)", dates.len());
        }

        let export_path = if options.export {
            match export_records(&records, &self.config.export_dir, start) {
                Ok(path) => Some(path.display().to_string()),
                Err(err) => {
                    error!(error = %err, "spreadsheet export failed");
                    None
                }
            }
        } else {
            None
        };

        let finished_at = Utc::now();
        let elapsed = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            inserted = tally.inserted,
            updated = tally.updated,
            failed = tally.failed,
            degraded,
            dates = dates_rendered,
            elapsed_secs = elapsed,
            "harvest complete"
        );

        Ok(HarvestRunSummary {
            run_id,
            started_at,
            finished_at,
            dates_requested: dates.len(),
            dates_rendered,
            summaries,
            batches,
            degraded,
            tally,
            export_path,
        })
    }

    /// Cron job re-running the harvest. A trigger that fires while a run is in progress is skipped.
    pub async fn build_scheduler(self: &Arc<Self>, options: RunOptions) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.watch_cron.clone();
        let pipeline = Arc::clone(self);
        let running = Arc::new(Mutex::new(()));

        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let running = Arc::clone(&running);
            let options = options.clone();
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    warn!("previous harvest still running; trigger skipped");
                    return;
                };
                if let Err(err) = pipeline.run_once(&options).await {
                    error!(error = %err, "scheduled harvest failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }

    /// Runs until Ctrl-C.
    pub async fn watch(self: Arc<Self>, options: RunOptions) -> Result<()> {
        let mut sched = self.build_scheduler(options).await?;
        sched.start().await.context("starting scheduler")?;
        info!(cron = %self.config.watch_cron, "watch mode started");

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("shutdown requested");
        sched.shutdown().await.context("stopping scheduler")?;
        Ok(())
    }
}
