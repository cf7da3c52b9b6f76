//! Postgres-backed [`RecordStore`] using per-record transactions.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tipwatch_core::{MatchRecord, CAPTURED_AT_COLUMN, RECORD_TEXT_COLUMNS};
use tracing::{info, warn};

use crate::store::{RecordStore, StoreError, UpsertKey, UpsertOutcome};

pub const DEFAULT_TABLE: &str = "match_predictions";

pub fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && table.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(table.to_string()))
    }
}

pub fn create_table_sql(table: &str, key: UpsertKey) -> String {
    let text_columns = RECORD_TEXT_COLUMNS
        .iter()
        .map(|col| format!("    {col} TEXT NOT NULL DEFAULT ''"))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    id BIGSERIAL PRIMARY KEY,\n    {CAPTURED_AT_COLUMN} TIMESTAMPTZ NOT NULL,\n{text_columns},\n    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    CONSTRAINT {table}_natural_key UNIQUE ({})\n)",
        key.columns().join(", ")
    )
}

fn key_predicate(key: UpsertKey, first_placeholder: usize) -> String {
    key.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", first_placeholder + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn exists_sql(table: &str, key: UpsertKey) -> String {
    format!("SELECT 1 FROM {table} WHERE {}", key_predicate(key, 1))
}

pub fn insert_sql(table: &str) -> String {
    let columns = std::iter::once(CAPTURED_AT_COLUMN)
        .chain(RECORD_TEXT_COLUMNS)
        .collect::<Vec<_>>();
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Text columns overwritten on update: everything outside the key.
pub fn update_columns(key: UpsertKey) -> Vec<&'static str> {
    RECORD_TEXT_COLUMNS
        .iter()
        .copied()
        .filter(|col| !key.is_key_column(col))
        .collect()
}

pub fn update_sql(table: &str, key: UpsertKey) -> String {
    let assignments = std::iter::once(CAPTURED_AT_COLUMN)
        .chain(update_columns(key))
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", i + 1))
        .collect::<Vec<_>>();
    let first_key_placeholder = assignments.len() + 1;
    format!(
        "UPDATE {table} SET {}, updated_at = now() WHERE {}",
        assignments.join(", "),
        key_predicate(key, first_key_placeholder)
    )
}

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    table: String,
    key: UpsertKey,
    exists_sql: String,
    insert_sql: String,
    update_sql: String,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, table: &str, key: UpsertKey) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            key,
            exists_sql: exists_sql(table, key),
            insert_sql: insert_sql(table),
            update_sql: update_sql(table, key),
        })
    }

    pub async fn connect(database_url: &str, table: &str, key: UpsertKey) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Self::new(pool, table, key)
    }

    async fn write(&self, conn: &mut PgConnection, record: &MatchRecord) -> Result<UpsertOutcome, StoreError> {
        let mut exists = sqlx::query(&self.exists_sql);
        for col in self.key.columns() {
            exists = exists.bind(record.column_value(col).unwrap_or_default());
        }
        let existing = exists.fetch_optional(&mut *conn).await?;

        if existing.is_some() {
            let mut update = sqlx::query(&self.update_sql).bind(record.captured_at());
            for col in update_columns(self.key) {
                update = update.bind(record.column_value(col).unwrap_or_default());
            }
            for col in self.key.columns() {
                update = update.bind(record.column_value(col).unwrap_or_default());
            }
            update.execute(&mut *conn).await?;
            Ok(UpsertOutcome::Updated)
        } else {
            let mut insert = sqlx::query(&self.insert_sql).bind(record.captured_at());
            for value in record.text_values() {
                insert = insert.bind(value);
            }
            insert.execute(&mut *conn).await?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&create_table_sql(&self.table, self.key))
            .execute(&self.pool)
            .await?;
        info!(table = %self.table, key = %self.key, "table ready");
        Ok(())
    }

    async fn upsert_record(&self, record: &MatchRecord) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        match self.write(&mut tx, record).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
