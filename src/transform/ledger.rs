//! Transform ledger: records the outcome of every transform attempt, even
//! when the artifact's identity cannot be resolved.

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStatus {
    Ongoing,
    Processed,
    Error,
}

impl TransformStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformStatus::Ongoing => "ongoing",
            TransformStatus::Processed => "processed",
            TransformStatus::Error => "error",
        }
    }
}

pub struct TransformLedger<'a> {
    db: &'a Db,
}

impl<'a> TransformLedger<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Phase one for artifacts with resolved identity.
    pub async fn open(&self, batch_date: NaiveDate, country_id: i64) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO transform_log (batch_date, country_id, status) VALUES (?, ?, 'ongoing')",
        )
        .bind(batch_date)
        .bind(country_id)
        .execute(&self.db.pool)
        .await
        .context("opening transform record")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn complete(
        &self,
        transform_id: i64,
        directory: &str,
        file_name: &str,
        row_count: i64,
        status: TransformStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transform_log
             SET processed_directory_name = ?, processed_file_name = ?, row_count = ?, status = ?
             WHERE id = ?",
        )
        .bind(directory)
        .bind(file_name)
        .bind(row_count)
        .bind(status.as_str())
        .bind(transform_id)
        .execute(&self.db.pool)
        .await
        .context("completing transform record")?;
        Ok(())
    }

    /// Single-shot error record for artifacts whose identity could not be
    /// resolved: batch_date and/or country_id stay NULL on purpose, the
    /// attempt itself must still be on the books.
    pub async fn record_error(
        &self,
        batch_date: Option<NaiveDate>,
        country_id: Option<i64>,
        directory: &str,
        file_name: &str,
        row_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO transform_log
             (batch_date, country_id, status, processed_directory_name, processed_file_name, row_count)
             VALUES (?, ?, 'error', ?, ?, ?)",
        )
        .bind(batch_date)
        .bind(country_id)
        .bind(directory)
        .bind(file_name)
        .bind(row_count)
        .execute(&self.db.pool)
        .await
        .context("recording unresolved transform error")?;
        Ok(())
    }
}
