//! Transform stage: validates raw artifacts against their expected shape,
//! writes normalized staging rows and routes each artifact to its
//! processed/error location, with a ledger record for every attempt.
//!
//! Per-artifact state machine:
//! name parse failure -> error/unknown with a NULL-identity ledger row;
//! unknown country    -> error/<kind>, batch date kept, country NULL;
//! otherwise an `ongoing` record is opened, the payload is validated, and
//! the terminal state (processed/error) relocates the file first and then
//! completes the record with the final location and a row-count estimate.

pub mod ledger;
pub mod validation;
pub mod weather_codes;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::db::Db;
use crate::registry::Country;
use crate::staging::{self, DataKind, DataRoot};
use ledger::{TransformLedger, TransformStatus};
use validation::{parse_covid, parse_weather, ValidationError, WeatherObservation};
use weather_codes::WeatherCodeLookup;

/// Runs the transform stage over every raw artifact of both kinds. The
/// staging tables are truncated first: they only ever reflect this run's
/// successfully parsed artifacts.
pub async fn run(
    db: &Db,
    root: &DataRoot,
    countries: &HashMap<String, Country>,
    lookup: &WeatherCodeLookup,
) -> Result<()> {
    db.truncate_staging().await?;
    let ledger = TransformLedger::new(db);

    for kind in DataKind::ALL {
        for file in staging::list_files(&root.raw(kind)) {
            process_artifact(db, &ledger, root, kind, &file, countries, lookup).await?;
        }
    }
    Ok(())
}

async fn process_artifact(
    db: &Db,
    ledger: &TransformLedger<'_>,
    root: &DataRoot,
    kind: DataKind,
    file: &Path,
    countries: &HashMap<String, Country>,
    lookup: &WeatherCodeLookup,
) -> Result<()> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // 1. Resolve identity from the name.
    let Some((country_code, batch_date)) = staging::parse_artifact_name(&file_name) else {
        let target_dir = root.error_unknown();
        let moved = staging::relocate(file, &target_dir)?;
        let row_count = staging::row_count_at(&moved);
        ledger
            .record_error(None, None, &target_dir.display().to_string(), &file_name, row_count)
            .await?;
        warn!(file = %file_name, "artifact name does not parse; routed to error/unknown");
        return Ok(());
    };

    // 2. Resolve the country against the registry.
    let Some(country) = countries.get(&country_code) else {
        let target_dir = root.error(kind);
        let moved = staging::relocate(file, &target_dir)?;
        let row_count = staging::row_count_at(&moved);
        ledger
            .record_error(
                Some(batch_date),
                None,
                &target_dir.display().to_string(),
                &file_name,
                row_count,
            )
            .await?;
        warn!(file = %file_name, country = %country_code, "country not in registry");
        return Ok(());
    };

    // 3. Identity resolved; the attempt is now on the books as ongoing.
    let transform_id = ledger.open(batch_date, country.id).await?;

    // 4. Shape validation. Database errors abort the run; validation
    // failures are a terminal state of this artifact only.
    let validated = fs::read_to_string(file)
        .map_err(ValidationError::from)
        .and_then(|text| match kind {
            DataKind::Weather => parse_weather(&text).map(StagedRows::Weather),
            DataKind::Covid => parse_covid(&text).map(StagedRows::Covid),
        });

    match validated {
        Ok(rows) => {
            let inserted = rows.insert(db, country, lookup).await?;
            let target_dir = root.processed(kind);
            staging::relocate(file, &target_dir)?;
            ledger
                .complete(
                    transform_id,
                    &target_dir.display().to_string(),
                    &file_name,
                    inserted,
                    TransformStatus::Processed,
                )
                .await?;
            info!(file = %file_name, rows = inserted, "artifact processed");
        }
        Err(e) => {
            // Content stays byte-identical for manual inspection.
            let target_dir = root.error(kind);
            let moved = staging::relocate(file, &target_dir)?;
            let row_count = staging::row_count_at(&moved);
            ledger
                .complete(
                    transform_id,
                    &target_dir.display().to_string(),
                    &file_name,
                    row_count,
                    TransformStatus::Error,
                )
                .await?;
            warn!(file = %file_name, error = %e, "artifact failed validation");
        }
    }
    Ok(())
}

enum StagedRows {
    Weather(Vec<WeatherObservation>),
    Covid(validation::CovidDaily),
}

impl StagedRows {
    /// Inserts this run's normalized rows, snapshotting the country's code
    /// and coordinates at transform time. Returns the inserted row count.
    async fn insert(
        self,
        db: &Db,
        country: &Country,
        lookup: &WeatherCodeLookup,
    ) -> Result<i64> {
        match self {
            StagedRows::Weather(observations) => {
                let n = observations.len() as i64;
                for obs in observations {
                    insert_weather_row(db, country, &obs, &lookup.describe(obs.weather_code))
                        .await?;
                }
                Ok(n)
            }
            StagedRows::Covid(daily) => {
                sqlx::query(
                    "INSERT INTO covid_data_import
                     (country_id, country_code, latitude, longitude, date,
                      confirmed_cases, deaths, recovered)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(country.id)
                .bind(&country.code)
                .bind(country.latitude)
                .bind(country.longitude)
                .bind(daily.date)
                .bind(daily.confirmed_diff)
                .bind(daily.deaths_diff)
                .bind(daily.recovered_diff)
                .execute(&db.pool)
                .await
                .context("inserting covid staging row")?;
                Ok(1)
            }
        }
    }
}

async fn insert_weather_row(
    db: &Db,
    country: &Country,
    obs: &WeatherObservation,
    description: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO weather_data_import
         (country_id, country_code, latitude, longitude, date, weather_code,
          weather_description, mean_temperature, mean_surface_pressure,
          precipitation_sum, relative_humidity, wind_speed)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(country.id)
    .bind(&country.code)
    .bind(country.latitude)
    .bind(country.longitude)
    .bind(obs.date)
    .bind(obs.weather_code.to_string())
    .bind(description)
    .bind(obs.mean_temperature)
    .bind(obs.mean_surface_pressure)
    .bind(obs.precipitation_sum)
    .bind(obs.relative_humidity)
    .bind(obs.wind_speed)
    .execute(&db.pool)
    .await
    .context("inserting weather staging row")?;
    Ok(())
}
