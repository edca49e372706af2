//! Two-phase write logs for the extraction stage.
//!
//! Both ledgers follow the same discipline: `open` claims the attempt and
//! returns a surrogate id, `complete` finalizes it by that id. An open row
//! with no completion is deliberate forensic evidence of a crashed or
//! still-running attempt, never cleaned up automatically.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::Row;

use crate::db::Db;

/// Ledger of every API call attempt.
pub struct ApiCallLedger<'a> {
    db: &'a Db,
}

impl<'a> ApiCallLedger<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Phase one: record that a request went out. Returns the id needed to
    /// complete the record.
    pub async fn open(
        &self,
        country_id: i64,
        api_id: i64,
        start_time: NaiveDateTime,
    ) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO api_import_log (country_id, api_id, start_time) VALUES (?, ?, ?)",
        )
        .bind(country_id)
        .bind(api_id)
        .bind(start_time)
        .execute(&self.db.pool)
        .await
        .context("opening api call record")?;
        Ok(res.last_insert_rowid())
    }

    /// Phase two: classify the attempt. Exactly one completion per open
    /// record; failed calls are completed with their non-200 status, never
    /// re-queued.
    pub async fn complete(
        &self,
        call_id: i64,
        end_time: NaiveDateTime,
        status_code: u16,
        error_message: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE api_import_log SET end_time = ?, code_response = ?, error_message = ? WHERE id = ?",
        )
        .bind(end_time)
        .bind(i64::from(status_code))
        .bind(error_message)
        .bind(call_id)
        .execute(&self.db.pool)
        .await
        .context("completing api call record")?;
        Ok(())
    }
}

/// Ledger of every staged artifact.
pub struct ImportLedger<'a> {
    db: &'a Db,
}

impl<'a> ImportLedger<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub async fn open(
        &self,
        batch_date: NaiveDate,
        country_id: i64,
        directory: &str,
        file_name: &str,
    ) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO import_log (batch_date, country_id, import_directory_name, import_file_name)
             VALUES (?, ?, ?, ?)",
        )
        .bind(batch_date)
        .bind(country_id)
        .bind(directory)
        .bind(file_name)
        .execute(&self.db.pool)
        .await
        .context("opening import record")?;
        Ok(res.last_insert_rowid())
    }

    /// Earliest creation date ever recorded for this (directory, file name)
    /// pair, across all batches.
    pub async fn find_created_date(
        &self,
        directory: &str,
        file_name: &str,
    ) -> Result<Option<NaiveDate>> {
        let row = sqlx::query(
            "SELECT MIN(file_created_date) AS created FROM import_log
             WHERE import_directory_name = ? AND import_file_name = ?
             AND file_created_date IS NOT NULL",
        )
        .bind(directory)
        .bind(file_name)
        .fetch_one(&self.db.pool)
        .await
        .context("looking up prior created date")?;
        Ok(row.get::<Option<NaiveDate>, _>("created"))
    }

    /// Finalizes the record once the file is flushed and counted. The
    /// creation date is first-write-wins: a prior date recorded for the same
    /// path always beats the caller's value. Everything else is
    /// last-write-wins.
    pub async fn complete(
        &self,
        import_id: i64,
        directory: &str,
        file_name: &str,
        created_date: NaiveDate,
        modified_date: NaiveDate,
        row_count: i64,
    ) -> Result<()> {
        let created = self
            .find_created_date(directory, file_name)
            .await?
            .unwrap_or(created_date);

        sqlx::query(
            "UPDATE import_log SET file_created_date = ?, file_last_modified_date = ?, row_count = ?
             WHERE id = ?",
        )
        .bind(created)
        .bind(modified_date)
        .bind(row_count)
        .bind(import_id)
        .execute(&self.db.pool)
        .await
        .context("completing import record")?;
        Ok(())
    }
}
