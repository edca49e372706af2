//! Extraction stage: one country-by-country loop per registered API,
//! ledgering every call and staging every usable body as a raw artifact.

pub mod ledger;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::api::{self, SourceApi, NOT_FOUND};
use crate::db::Db;
use crate::registry::Country;
use crate::staging::{self, DataRoot};
use ledger::{ApiCallLedger, ImportLedger};

/// Runs extraction for every (api, country) pair. `date` is the observation
/// date requested upstream; `batch_date` names the artifacts of this run.
///
/// Any database failure aborts the whole run (the caller must not continue
/// to transform/load); the pool is released by scope. HTTP failures never
/// abort: they are classified into the ledger and the loop moves on.
pub async fn run(
    db: &Db,
    root: &DataRoot,
    sources: &[Box<dyn SourceApi>],
    countries: &[Country],
    date: NaiveDate,
    batch_date: NaiveDate,
) -> Result<()> {
    let client = api::build_client()?;
    let api_calls = ApiCallLedger::new(db);
    let imports = ImportLedger::new(db);

    for source in sources {
        let kind = source.kind();
        let raw_dir = root.raw(kind);
        let dir_name = raw_dir.display().to_string();

        for country in countries {
            let (raw, start_time) = source.send_request(&client, country, date).await;
            let call_id = api_calls
                .open(country.id, source.api_id(), start_time)
                .await
                .context("extract loop aborted")?;

            let Some(raw) = raw else {
                // Transport failure: completed call, no usable body, nothing
                // staged, no retry.
                api_calls
                    .complete(call_id, Utc::now().naive_utc(), 404, NOT_FOUND)
                    .await?;
                warn!(kind = kind.dir_name(), country = %country.code, "transport failure");
                continue;
            };

            let parsed = source.parse(raw);
            api_calls
                .complete(
                    call_id,
                    parsed.end_time,
                    parsed.status_code,
                    &parsed.error_message,
                )
                .await?;

            match parsed.status_code {
                200..=299 => {
                    info!(kind = kind.dir_name(), country = %country.code, status = parsed.status_code, "response ok")
                }
                400..=499 => {
                    warn!(kind = kind.dir_name(), country = %country.code, status = parsed.status_code, detail = %parsed.error_message, "client error")
                }
                _ => {
                    warn!(kind = kind.dir_name(), country = %country.code, status = parsed.status_code, detail = %parsed.error_message, "server error")
                }
            }

            // Error bodies are staged too; the transform stage routes them to
            // the error area with a truthful ledger trail.
            let file_name = staging::artifact_file_name(kind, &country.code, batch_date);
            let import_id = imports
                .open(batch_date, country.id, &dir_name, &file_name)
                .await?;

            let staged = staging::stage(&parsed.body, &raw_dir, &file_name)?;
            let row_count = staging::row_count_at(staged.temp_path());
            let today = Utc::now().date_naive();
            imports
                .complete(import_id, &dir_name, &file_name, today, today, row_count)
                .await?;
            // Ledger first, then the atomic rename: a crash in between leaves
            // the final name absent and the record still truthful about the
            // write we did.
            staged.promote()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RawResponse;
    use crate::db::test_db;
    use crate::staging::DataKind;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use serde_json::Value;
    use sqlx::Row;
    use tempfile::tempdir;

    /// Offline stand-in: a canned response (or transport failure) instead of
    /// the network.
    struct CannedApi {
        canned: Option<RawResponse>,
    }

    #[async_trait]
    impl SourceApi for CannedApi {
        fn api_id(&self) -> i64 {
            1
        }
        fn kind(&self) -> DataKind {
            DataKind::Weather
        }
        fn endpoint(&self, _country: &Country, _date: NaiveDate) -> String {
            "http://unused.test".into()
        }
        fn error_message(&self, body: &Value) -> String {
            body.get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        }
        async fn send_request(
            &self,
            _client: &reqwest::Client,
            _country: &Country,
            _date: NaiveDate,
        ) -> (Option<RawResponse>, NaiveDateTime) {
            (self.canned.clone(), Utc::now().naive_utc())
        }
    }

    fn moldova() -> Country {
        Country {
            id: 7,
            code: "MDA".into(),
            name: "Moldova".into(),
            latitude: 47.4116,
            longitude: 28.3699,
        }
    }

    #[tokio::test]
    async fn ok_response_is_ledgered_and_staged() {
        let db = test_db().await;
        let dir = tempdir().unwrap();
        let root = DataRoot::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let sources: Vec<Box<dyn SourceApi>> = vec![Box::new(CannedApi {
            canned: Some(RawResponse {
                status: 200,
                text: r#"{"daily": {"time": ["2024-03-01"], "weather_code": [3]}}"#.into(),
            }),
        })];

        run(&db, &root, &sources, &[moldova()], date, date)
            .await
            .unwrap();

        let call = sqlx::query("SELECT code_response, error_message FROM api_import_log")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(call.get::<i64, _>("code_response"), 200);
        assert_eq!(call.get::<String, _>("error_message"), "");

        let artifact = root.raw(DataKind::Weather).join("weather_data_MDA_2024-03-01.json");
        assert!(artifact.exists());

        let import = sqlx::query("SELECT import_file_name, row_count FROM import_log")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(
            import.get::<String, _>("import_file_name"),
            "weather_data_MDA_2024-03-01.json"
        );
        // one top-level key ("daily") with two entries
        assert_eq!(import.get::<i64, _>("row_count"), 2);
    }

    #[tokio::test]
    async fn transport_failure_completes_call_and_stages_nothing() {
        let db = test_db().await;
        let dir = tempdir().unwrap();
        let root = DataRoot::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let sources: Vec<Box<dyn SourceApi>> = vec![Box::new(CannedApi { canned: None })];
        run(&db, &root, &sources, &[moldova()], date, date)
            .await
            .unwrap();

        let call = sqlx::query("SELECT code_response, error_message, end_time FROM api_import_log")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(call.get::<i64, _>("code_response"), 404);
        assert_eq!(call.get::<String, _>("error_message"), NOT_FOUND);
        assert!(call.get::<Option<NaiveDateTime>, _>("end_time").is_some());

        let imports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_log")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(imports, 0);
        assert!(staging::list_files(&root.raw(DataKind::Weather)).is_empty());
    }

    #[tokio::test]
    async fn error_body_is_still_staged() {
        let db = test_db().await;
        let dir = tempdir().unwrap();
        let root = DataRoot::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let sources: Vec<Box<dyn SourceApi>> = vec![Box::new(CannedApi {
            canned: Some(RawResponse {
                status: 400,
                text: r#"{"error": true, "reason": "Latitude must be in range"}"#.into(),
            }),
        })];
        run(&db, &root, &sources, &[moldova()], date, date)
            .await
            .unwrap();

        let call = sqlx::query("SELECT code_response, error_message FROM api_import_log")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(call.get::<i64, _>("code_response"), 400);
        assert_eq!(
            call.get::<String, _>("error_message"),
            "Latitude must be in range"
        );

        // the error body itself lands in the raw area
        assert_eq!(staging::list_files(&root.raw(DataKind::Weather)).len(), 1);
    }
}
