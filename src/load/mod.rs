//! Warehouse loader: five hash-based upsert merges from the staging tables
//! into the dimensional schema.
//!
//! Every merge compares a content hash of the incoming row against the
//! stored row's hash: absent rows are inserted, mismatched rows are updated
//! in place, matching rows are untouched. Dimensions must merge before
//! facts within a run; the fact merges resolve surrogate keys through inner
//! joins, so a fact row whose dimension row does not exist yet is silently
//! dropped (documented behavior, deliberately not corrected).

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::info;

use crate::db::Db;

/// SHA-256 hex over a `|`-joined attribute string. Only stability matters;
/// the same attributes must always produce the same value.
pub fn hash_value(parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Calendar attributes derived for one dim_date row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParts {
    pub date_id: i64,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: i64,
    pub is_weekend: bool,
}

pub fn date_parts(date: NaiveDate) -> DateParts {
    let day_of_week = i64::from(date.weekday().num_days_from_sunday());
    DateParts {
        date_id: i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day()),
        year: i64::from(date.year()),
        month: i64::from(date.month()),
        day: i64::from(date.day()),
        day_of_week,
        is_weekend: day_of_week == 0 || day_of_week == 6,
    }
}

pub struct Loader<'a> {
    db: &'a Db,
}

impl<'a> Loader<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Dimensions strictly before facts.
    pub async fn run(&self) -> Result<()> {
        self.merge_dim_country().await?;
        self.merge_dim_date().await?;
        self.merge_dim_weather_code().await?;
        self.merge_fact_covid().await?;
        self.merge_fact_weather().await?;
        Ok(())
    }

    /// Source: distinct registry rows actually referenced by either staging
    /// table.
    pub async fn merge_dim_country(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT DISTINCT c.id, c.code, c.name, c.latitude, c.longitude
             FROM country c
             JOIN (SELECT country_id FROM covid_data_import
                   UNION
                   SELECT country_id FROM weather_data_import) used
               ON used.country_id = c.id",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("reading dim_country source")?;

        let mut tx = self.db.pool.begin().await?;
        let mut affected = 0u64;
        for r in rows {
            let id: i64 = r.get("id");
            let code: String = r.get("code");
            let name: String = r.get("name");
            let latitude: f64 = r.get("latitude");
            let longitude: f64 = r.get("longitude");
            let hash = hash_value(&[
                id.to_string(),
                code.clone(),
                name.clone(),
                latitude.to_string(),
                longitude.to_string(),
            ]);

            let res = sqlx::query(
                "INSERT INTO dim_country
                 (country_id, country_code, country_name, latitude, longitude, hash_value)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(country_id) DO UPDATE SET
                   country_code = excluded.country_code,
                   country_name = excluded.country_name,
                   latitude = excluded.latitude,
                   longitude = excluded.longitude,
                   hash_value = excluded.hash_value
                 WHERE dim_country.hash_value <> excluded.hash_value",
            )
            .bind(id)
            .bind(&code)
            .bind(&name)
            .bind(latitude)
            .bind(longitude)
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            affected += res.rows_affected();
        }
        tx.commit().await?;
        info!(affected, "dim_country merged");
        Ok(affected)
    }

    /// Source: distinct dates from both staging tables, calendar attributes
    /// derived here.
    pub async fn merge_dim_date(&self) -> Result<u64> {
        let dates: Vec<NaiveDate> = sqlx::query_scalar(
            "SELECT date FROM covid_data_import
             UNION
             SELECT date FROM weather_data_import",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("reading dim_date source")?;

        let mut tx = self.db.pool.begin().await?;
        let mut affected = 0u64;
        for date in dates {
            let p = date_parts(date);
            let weekend_label = if p.is_weekend { "TRUE" } else { "FALSE" };
            let hash = hash_value(&[
                p.date_id.to_string(),
                p.year.to_string(),
                p.month.to_string(),
                p.day.to_string(),
                p.day_of_week.to_string(),
                weekend_label.to_string(),
            ]);

            let res = sqlx::query(
                "INSERT INTO dim_date
                 (date_id, date, year, month, day, day_of_week, is_weekend, hash_value)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(date_id) DO UPDATE SET
                   date = excluded.date,
                   year = excluded.year,
                   month = excluded.month,
                   day = excluded.day,
                   day_of_week = excluded.day_of_week,
                   is_weekend = excluded.is_weekend,
                   hash_value = excluded.hash_value
                 WHERE dim_date.hash_value <> excluded.hash_value",
            )
            .bind(p.date_id)
            .bind(date)
            .bind(p.year)
            .bind(p.month)
            .bind(p.day)
            .bind(p.day_of_week)
            .bind(p.is_weekend)
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            affected += res.rows_affected();
        }
        tx.commit().await?;
        info!(affected, "dim_date merged");
        Ok(affected)
    }

    /// Source: distinct (code, description) pairs seen in weather staging.
    pub async fn merge_dim_weather_code(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT DISTINCT weather_code, weather_description FROM weather_data_import",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("reading dim_weather_code source")?;

        let mut tx = self.db.pool.begin().await?;
        let mut affected = 0u64;
        for r in rows {
            let code: String = r.get("weather_code");
            let description: String = r.get("weather_description");
            let hash = hash_value(&[code.clone(), description.clone()]);

            let res = sqlx::query(
                "INSERT INTO dim_weather_code (weather_code, description, hash_value)
                 VALUES (?, ?, ?)
                 ON CONFLICT(weather_code) DO UPDATE SET
                   description = excluded.description,
                   hash_value = excluded.hash_value
                 WHERE dim_weather_code.hash_value <> excluded.hash_value",
            )
            .bind(&code)
            .bind(&description)
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            affected += res.rows_affected();
        }
        tx.commit().await?;
        info!(affected, "dim_weather_code merged");
        Ok(affected)
    }

    /// Inner-joins staging to the current dimensions for surrogate keys;
    /// updates stamp `updated_at`, inserts stamp both timestamps.
    pub async fn merge_fact_covid(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT t.country_id, d.date_id, t.confirmed_cases, t.deaths, t.recovered
             FROM covid_data_import t
             JOIN dim_country c ON t.country_id = c.country_id
             JOIN dim_date d ON t.date = d.date",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("reading fact_covid source")?;

        let mut tx = self.db.pool.begin().await?;
        let mut affected = 0u64;
        for r in rows {
            let country_id: i64 = r.get("country_id");
            let date_id: i64 = r.get("date_id");
            let confirmed: i64 = r.get("confirmed_cases");
            let deaths: i64 = r.get("deaths");
            let recovered: i64 = r.get("recovered");
            let hash = hash_value(&[
                country_id.to_string(),
                date_id.to_string(),
                confirmed.to_string(),
                deaths.to_string(),
                recovered.to_string(),
            ]);

            let res = sqlx::query(
                "INSERT INTO fact_covid
                 (country_id, date_id, confirmed_cases, deaths, recovered, hash_value,
                  created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
                 ON CONFLICT(country_id, date_id) DO UPDATE SET
                   confirmed_cases = excluded.confirmed_cases,
                   deaths = excluded.deaths,
                   recovered = excluded.recovered,
                   hash_value = excluded.hash_value,
                   updated_at = CURRENT_TIMESTAMP
                 WHERE fact_covid.hash_value <> excluded.hash_value",
            )
            .bind(country_id)
            .bind(date_id)
            .bind(confirmed)
            .bind(deaths)
            .bind(recovered)
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            affected += res.rows_affected();
        }
        tx.commit().await?;
        info!(affected, "fact_covid merged");
        Ok(affected)
    }

    pub async fn merge_fact_weather(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT t.country_id, d.date_id, t.weather_code, t.mean_temperature,
                    t.mean_surface_pressure, t.precipitation_sum, t.relative_humidity,
                    t.wind_speed
             FROM weather_data_import t
             JOIN dim_country c ON t.country_id = c.country_id
             JOIN dim_date d ON t.date = d.date",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("reading fact_weather source")?;

        let mut tx = self.db.pool.begin().await?;
        let mut affected = 0u64;
        for r in rows {
            let country_id: i64 = r.get("country_id");
            let date_id: i64 = r.get("date_id");
            let weather_code: String = r.get("weather_code");
            let mean_temperature: f64 = r.get("mean_temperature");
            let mean_surface_pressure: f64 = r.get("mean_surface_pressure");
            let precipitation_sum: f64 = r.get("precipitation_sum");
            let relative_humidity: f64 = r.get("relative_humidity");
            let wind_speed: f64 = r.get("wind_speed");
            let hash = hash_value(&[
                country_id.to_string(),
                date_id.to_string(),
                weather_code.clone(),
                mean_temperature.to_string(),
                mean_surface_pressure.to_string(),
                precipitation_sum.to_string(),
                relative_humidity.to_string(),
                wind_speed.to_string(),
            ]);

            let res = sqlx::query(
                "INSERT INTO fact_weather
                 (country_id, date_id, weather_code, mean_temperature, mean_surface_pressure,
                  precipitation_sum, relative_humidity, wind_speed, hash_value,
                  created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
                 ON CONFLICT(country_id, date_id) DO UPDATE SET
                   weather_code = excluded.weather_code,
                   mean_temperature = excluded.mean_temperature,
                   mean_surface_pressure = excluded.mean_surface_pressure,
                   precipitation_sum = excluded.precipitation_sum,
                   relative_humidity = excluded.relative_humidity,
                   wind_speed = excluded.wind_speed,
                   hash_value = excluded.hash_value,
                   updated_at = CURRENT_TIMESTAMP
                 WHERE fact_weather.hash_value <> excluded.hash_value",
            )
            .bind(country_id)
            .bind(date_id)
            .bind(&weather_code)
            .bind(mean_temperature)
            .bind(mean_surface_pressure)
            .bind(precipitation_sum)
            .bind(relative_humidity)
            .bind(wind_speed)
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            affected += res.rows_affected();
        }
        tx.commit().await?;
        info!(affected, "fact_weather merged");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::registry;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = hash_value(&["7".into(), "MDA".into()]);
        let b = hash_value(&["7".into(), "MDA".into()]);
        let c = hash_value(&["7".into(), "DEU".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn date_parts_derivation() {
        // 2024-03-01 was a Friday, 2024-03-02 a Saturday.
        let friday = date_parts(d("2024-03-01"));
        assert_eq!(friday.date_id, 20240301);
        assert_eq!(friday.year, 2024);
        assert_eq!(friday.month, 3);
        assert_eq!(friday.day, 1);
        assert_eq!(friday.day_of_week, 5);
        assert!(!friday.is_weekend);

        let saturday = date_parts(d("2024-03-02"));
        assert_eq!(saturday.day_of_week, 6);
        assert!(saturday.is_weekend);

        let sunday = date_parts(d("2024-03-03"));
        assert_eq!(sunday.day_of_week, 0);
        assert!(sunday.is_weekend);
    }

    async fn seed_covid_staging(db: &Db, country_id: i64, date: &str, confirmed: i64) {
        sqlx::query(
            "INSERT INTO covid_data_import
             (country_id, country_code, latitude, longitude, date, confirmed_cases, deaths, recovered)
             VALUES (?, 'MDA', 47.4116, 28.3699, ?, ?, 0, 3)",
        )
        .bind(country_id)
        .bind(d(date))
        .bind(confirmed)
        .execute(&db.pool)
        .await
        .unwrap();
    }

    async fn seed_weather_staging(db: &Db, country_id: i64, date: &str) {
        sqlx::query(
            "INSERT INTO weather_data_import
             (country_id, country_code, latitude, longitude, date, weather_code,
              weather_description, mean_temperature, mean_surface_pressure,
              precipitation_sum, relative_humidity, wind_speed)
             VALUES (?, 'MDA', 47.4116, 28.3699, ?, '3',
                     'Clouds generally forming or developing', 5.1, 1012.3, 0.0, 80.0, 12.4)",
        )
        .bind(country_id)
        .bind(d(date))
        .execute(&db.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn merge_dim_country_is_idempotent() {
        let db = test_db().await;
        let id = registry::add_country(&db, "MDA", "Moldova", 47.4116, 28.3699)
            .await
            .unwrap();
        seed_covid_staging(&db, id, "2024-03-01", 12).await;

        let loader = Loader::new(&db);
        let first = loader.merge_dim_country().await.unwrap();
        assert_eq!(first, 1);

        let before = sqlx::query("SELECT * FROM dim_country")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let hash_before: String = before.get("hash_value");
        let name_before: String = before.get("country_name");

        // Second run with no staging changes: nothing may move.
        let second = loader.merge_dim_country().await.unwrap();
        assert_eq!(second, 0);
        let after = sqlx::query("SELECT * FROM dim_country")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(after.get::<String, _>("hash_value"), hash_before);
        assert_eq!(after.get::<String, _>("country_name"), name_before);
    }

    #[tokio::test]
    async fn dim_country_updates_in_place_on_attribute_change() {
        let db = test_db().await;
        let id = registry::add_country(&db, "MDA", "Moldavia", 47.4116, 28.3699)
            .await
            .unwrap();
        seed_covid_staging(&db, id, "2024-03-01", 12).await;

        let loader = Loader::new(&db);
        loader.merge_dim_country().await.unwrap();

        // Registry rename: the hash mismatch drives an in-place update.
        sqlx::query("UPDATE country SET name = 'Moldova' WHERE id = ?")
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();
        let affected = loader.merge_dim_country().await.unwrap();
        assert_eq!(affected, 1);

        let row = sqlx::query("SELECT country_name FROM dim_country WHERE country_id = ?")
            .bind(id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("country_name"), "Moldova");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dim_country")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn fact_covid_updates_in_place_across_runs() {
        let db = test_db().await;
        let id = registry::add_country(&db, "MDA", "Moldova", 47.4116, 28.3699)
            .await
            .unwrap();
        seed_covid_staging(&db, id, "2024-03-01", 12).await;

        let loader = Loader::new(&db);
        loader.run().await.unwrap();

        let created_at: String = sqlx::query_scalar("SELECT created_at FROM fact_covid")
            .fetch_one(&db.pool)
            .await
            .unwrap();

        // Next run: same key, different measure.
        db.truncate_staging().await.unwrap();
        seed_covid_staging(&db, id, "2024-03-01", 20).await;
        loader.run().await.unwrap();

        let rows = sqlx::query("SELECT confirmed_cases, created_at FROM fact_covid")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1, "update in place, not a duplicate");
        assert_eq!(rows[0].get::<i64, _>("confirmed_cases"), 20);
        assert_eq!(rows[0].get::<String, _>("created_at"), created_at);
    }

    #[tokio::test]
    async fn fact_rows_without_dimensions_are_dropped_by_the_join() {
        let db = test_db().await;
        let id = registry::add_country(&db, "MDA", "Moldova", 47.4116, 28.3699)
            .await
            .unwrap();
        seed_covid_staging(&db, id, "2024-03-01", 12).await;

        let loader = Loader::new(&db);
        // dim_date never merged: the join yields nothing.
        loader.merge_dim_country().await.unwrap();
        loader.merge_fact_covid().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fact_covid")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn full_run_populates_all_five_targets() {
        let db = test_db().await;
        let id = registry::add_country(&db, "MDA", "Moldova", 47.4116, 28.3699)
            .await
            .unwrap();
        seed_covid_staging(&db, id, "2024-03-01", 12).await;
        seed_weather_staging(&db, id, "2024-03-01").await;

        Loader::new(&db).run().await.unwrap();

        for table in ["dim_country", "dim_date", "dim_weather_code", "fact_covid", "fact_weather"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&db.pool)
                .await
                .unwrap();
            assert_eq!(count, 1, "{table} should hold one row");
        }

        let fact = sqlx::query("SELECT date_id, weather_code FROM fact_weather")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(fact.get::<i64, _>("date_id"), 20240301);
        assert_eq!(fact.get::<String, _>("weather_code"), "3");
    }
}
