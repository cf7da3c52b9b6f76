//! Persistent store contract plus an in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tipwatch_core::MatchRecord;
use tokio::sync::Mutex;

/// Uniqueness key deciding insert vs. update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKey {
    /// One row per match URL regardless of other field drift.
    #[default]
    MatchUrl,
    /// `(game, home_team, away_team, match_url)`.
    Composite,
}

impl UpsertKey {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::MatchUrl => &["match_url"],
            Self::Composite => &["game", "home_team", "away_team", "match_url"],
        }
    }

    pub fn key_of(&self, record: &MatchRecord) -> Vec<String> {
        self.columns()
            .iter()
            .map(|col| record.column_value(col).unwrap_or_default().to_string())
            .collect()
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.columns().iter().any(|c| *c == column)
    }
}

impl fmt::Display for UpsertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchUrl => f.write_str("match_url"),
            Self::Composite => f.write_str("composite"),
        }
    }
}

impl FromStr for UpsertKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "match_url" | "url" => Ok(Self::MatchUrl),
            "composite" => Ok(Self::Composite),
            other => Err(StoreError::InvalidKey(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("unknown upsert key {0:?} (expected match_url or composite)")]
    InvalidKey(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Creates the target table if absent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Inserts or fully overwrites one record in its own transaction.
    async fn upsert_record(&self, record: &MatchRecord) -> Result<UpsertOutcome, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: i64,
    pub record: MatchRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    rows: BTreeMap<Vec<String>, StoredRow>,
}

/// Store with the same upsert semantics as Postgres, kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    key: UpsertKey,
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new(key: UpsertKey) -> Self {
        Self {
            key,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub async fn rows(&self) -> Vec<StoredRow> {
        let mut rows: Vec<_> = self.state.lock().await.rows.values().cloned().collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_record(&self, record: &MatchRecord) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now();
        let key = self.key.key_of(record);
        let mut state = self.state.lock().await;

        if let Some(row) = state.rows.get_mut(&key) {
            row.record = record.clone();
            row.updated_at = now;
            return Ok(UpsertOutcome::Updated);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.rows.insert(
            key,
            StoredRow {
                id,
                record: record.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(UpsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipwatch_core::MatchSummary;

    fn record(game: &str, url: &str, score: &str) -> MatchRecord {
        let mut summary = MatchSummary::new(game, "Home FC", "Away FC", url, Utc::now());
        summary.score = score.to_string();
        MatchRecord::from_summary(summary)
    }

    #[test]
    fn upsert_key_parses_and_displays() {
        assert_eq!("match_url".parse::<UpsertKey>().unwrap(), UpsertKey::MatchUrl);
        assert_eq!(" Composite ".parse::<UpsertKey>().unwrap(), UpsertKey::Composite);
        assert!("id".parse::<UpsertKey>().is_err());
        assert_eq!(UpsertKey::Composite.to_string(), "composite");
        assert!(UpsertKey::MatchUrl.is_key_column("match_url"));
        assert!(!UpsertKey::MatchUrl.is_key_column("game"));
    }

    #[tokio::test]
    async fn second_upsert_updates_in_place() {
        let store = MemoryRecordStore::new(UpsertKey::MatchUrl);
        let first = record("A - B", "https://x.test/m/1", "0 - 0");
        assert_eq!(store.upsert_record(&first).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_record(&first).await.unwrap(), UpsertOutcome::Updated);

        let later = record("A - B", "https://x.test/m/1", "2 - 1");
        assert_eq!(store.upsert_record(&later).await.unwrap(), UpsertOutcome::Updated);

        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].record.summary.score, "2 - 1");
    }

    #[tokio::test]
    async fn url_key_and_composite_key_disagree_on_field_drift() {
        let renamed = record("A-B (renamed)", "https://x.test/m/1", "");
        let original = record("A - B", "https://x.test/m/1", "");

        let by_url = MemoryRecordStore::new(UpsertKey::MatchUrl);
        by_url.upsert_record(&original).await.unwrap();
        by_url.upsert_record(&renamed).await.unwrap();
        assert_eq!(by_url.len().await, 1);

        let composite = MemoryRecordStore::new(UpsertKey::Composite);
        composite.upsert_record(&original).await.unwrap();
        composite.upsert_record(&renamed).await.unwrap();
        assert_eq!(composite.len().await, 2);
    }
}
