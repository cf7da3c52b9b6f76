//! Batched, bounded-concurrency detail enrichment.
//!
//! Summaries are split into contiguous batches. Inside a batch every summary with a usable detail
//! URL becomes a spawned task on a pool of `concurrency` slots; the batch is persisted only once all
//! of its tasks have resolved, and the next batch starts after that.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tipwatch_adapters::DetailExtractor;
use tipwatch_core::{MatchRecord, MatchSummary};
use tipwatch_storage::{PageFetcher, RecordStore};
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::SchedulerConfig;
use crate::reconcile::{Reconciler, UpsertTally};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleOutcome {
    pub records: Vec<MatchRecord>,
    pub tally: UpsertTally,
    pub batches: usize,
    /// Records left without detail data, bypassed ones included.
    pub degraded: usize,
}

pub struct EnrichmentScheduler {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<DetailExtractor>,
    /// Detail URLs outside this base are bypassed.
    base_url: String,
    config: SchedulerConfig,
}

impl EnrichmentScheduler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<DetailExtractor>,
        base_url: impl Into<String>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            base_url: base_url.into(),
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn run<S: RecordStore + ?Sized>(
        &self,
        summaries: Vec<MatchSummary>,
        reconciler: &Reconciler<S>,
    ) -> ScheduleOutcome {
        let batch_size = self.config.batch_size;
        let total_batches = summaries.len().div_ceil(batch_size);
        let mut outcome = ScheduleOutcome::default();
        let mut pending = summaries.into_iter().peekable();

        while pending.peek().is_some() {
            let batch: Vec<MatchSummary> = pending.by_ref().take(batch_size).collect();
            let batch_no = outcome.batches + 1;
            let span = info_span!("batch", batch = batch_no, of = total_batches, size = batch.len());

            let records = self.enrich_batch(batch).instrument(span.clone()).await;
            let tally = reconciler.upsert(&records).instrument(span.clone()).await;
            let degraded = records.iter().filter(|r| r.is_degraded()).count();
            span.in_scope(|| {
                info!(
                    inserted = tally.inserted,
                    updated = tally.updated,
                    failed = tally.failed,
                    degraded,
                    "batch persisted"
                )
            });

            outcome.tally += tally;
            outcome.degraded += degraded;
            outcome.records.extend(records);
            outcome.batches = batch_no;
        }
        outcome
    }

    /// Bypassed summaries come first, then enriched ones in completion order.
    pub async fn enrich_batch(&self, batch: Vec<MatchSummary>) -> Vec<MatchRecord> {
        let (fetchable, bypassed): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|s| s.has_usable_url(&self.base_url));

        let mut records = Vec::with_capacity(fetchable.len() + bypassed.len());
        for summary in bypassed {
            warn!(game = %summary.game, match_url = %summary.match_url, "no usable detail url; keeping listing data");
            records.push(MatchRecord::from_summary(summary));
        }

        let task_timeout = self.config.task_timeout;
        let enriched: Vec<MatchRecord> = stream::iter(fetchable.into_iter().map(|summary| {
            let fetcher = Arc::clone(&self.fetcher);
            let extractor = Arc::clone(&self.extractor);
            async move {
                let task = timeout(task_timeout, enrich(fetcher, extractor, summary.clone()));
                match tokio::spawn(task.in_current_span()).await {
                    Ok(Ok(record)) => record,
                    Ok(Err(_)) => {
                        error!(game = %summary.game, timeout_secs = task_timeout.as_secs_f64(), "detail enrichment timed out");
                        MatchRecord::from_summary(summary)
                    }
                    Err(err) => {
                        error!(game = %summary.game, error = %err, "detail enrichment task failed");
                        MatchRecord::from_summary(summary)
                    }
                }
            }
        }))
        .buffer_unordered(self.config.concurrency)
        .collect()
        .await;

        records.extend(enriched);
        records
    }
}

async fn enrich(
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<DetailExtractor>,
    summary: MatchSummary,
) -> MatchRecord {
    let Some(page) = fetcher.fetch(&summary.match_url).await.into_page() else {
        return MatchRecord::from_summary(summary);
    };
    let detail = extractor.extract_detail(&page.text(), &summary.home_team, &summary.away_team);
    MatchRecord::merge(summary, detail)
}
