//! Hands merged records to the store one by one and tallies the outcome.

use std::ops::AddAssign;
use std::sync::Arc;

use serde::Serialize;
use tipwatch_core::MatchRecord;
use tipwatch_storage::{RecordStore, UpsertOutcome};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertTally {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl UpsertTally {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.failed
    }
}

impl AddAssign for UpsertTally {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.failed += rhs.failed;
    }
}

pub struct Reconciler<S: RecordStore + ?Sized> {
    store: Arc<S>,
}

impl<S: RecordStore + ?Sized> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RecordStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A failed record is logged and counted; the remaining records are still written.
    pub async fn upsert(&self, records: &[MatchRecord]) -> UpsertTally {
        let mut tally = UpsertTally::default();
        for record in records {
            match self.store.upsert_record(record).await {
                Ok(UpsertOutcome::Inserted) => {
                    tally.inserted += 1;
                    debug!(game = %record.summary.game, "inserted");
                }
                Ok(UpsertOutcome::Updated) => {
                    tally.updated += 1;
                    debug!(game = %record.summary.game, "updated");
                }
                Err(err) => {
                    tally.failed += 1;
                    error!(
                        game = %record.summary.game,
                        match_url = %record.summary.match_url,
                        error = %err,
                        "record upsert failed"
                    );
                }
            }
        }
        tally
    }
}
