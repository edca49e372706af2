use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{info, instrument};

/// One warehouse connection pool, scoped to a single pipeline run. Ledgers,
/// staging tables and the dimensional schema all live in this database.
#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options =
            SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to warehouse db");
        Ok(Self { pool })
    }

    /// Creates every table the pipeline touches. All statements are
    /// `IF NOT EXISTS`, so calling this against an initialized warehouse is a
    /// no-op.
    pub async fn run_migrations(&self) -> Result<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        info!("schema ensured ({} statements)", SCHEMA.len());
        Ok(())
    }

    /// Staging tables hold only the current run's output; every transform run
    /// starts from empty.
    pub async fn truncate_staging(&self) -> Result<()> {
        sqlx::query("DELETE FROM weather_data_import")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM covid_data_import")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    // Reference data (owned by an administrator; pipeline reads only).
    "CREATE TABLE IF NOT EXISTS country (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS api_info (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        api_name TEXT NOT NULL UNIQUE,
        api_base_url TEXT NOT NULL
    )",
    // Extraction ledger: one row per API call attempt, completed in a second
    // write. An open row with no completion is evidence of a crashed call.
    "CREATE TABLE IF NOT EXISTS api_import_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        country_id INTEGER NOT NULL,
        api_id INTEGER NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        code_response INTEGER,
        error_message TEXT
    )",
    // Import ledger: one row per staged artifact, same two-phase pattern.
    "CREATE TABLE IF NOT EXISTS import_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_date TEXT NOT NULL,
        country_id INTEGER NOT NULL,
        import_directory_name TEXT NOT NULL,
        import_file_name TEXT NOT NULL,
        file_created_date TEXT,
        file_last_modified_date TEXT,
        row_count INTEGER
    )",
    // Transform ledger: batch_date/country_id stay NULL when the artifact
    // name itself fails validation.
    "CREATE TABLE IF NOT EXISTS transform_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_date TEXT,
        country_id INTEGER,
        status TEXT NOT NULL CHECK (status IN ('ongoing', 'processed', 'error')),
        processed_directory_name TEXT,
        processed_file_name TEXT,
        row_count INTEGER
    )",
    // Staging tables, truncated and fully rewritten each transform run.
    "CREATE TABLE IF NOT EXISTS weather_data_import (
        country_id INTEGER NOT NULL,
        country_code TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        date TEXT NOT NULL,
        weather_code TEXT NOT NULL,
        weather_description TEXT NOT NULL,
        mean_temperature REAL NOT NULL,
        mean_surface_pressure REAL NOT NULL,
        precipitation_sum REAL NOT NULL,
        relative_humidity REAL NOT NULL,
        wind_speed REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS covid_data_import (
        country_id INTEGER NOT NULL,
        country_code TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        date TEXT NOT NULL,
        confirmed_cases INTEGER NOT NULL,
        deaths INTEGER NOT NULL,
        recovered INTEGER NOT NULL
    )",
    // Dimensional schema. hash_value always matches the hash of the current
    // attribute values; a mismatch is the update trigger.
    "CREATE TABLE IF NOT EXISTS dim_country (
        country_id INTEGER PRIMARY KEY,
        country_code TEXT NOT NULL,
        country_name TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        hash_value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dim_date (
        date_id INTEGER PRIMARY KEY,
        date TEXT NOT NULL,
        year INTEGER NOT NULL,
        month INTEGER NOT NULL,
        day INTEGER NOT NULL,
        day_of_week INTEGER NOT NULL,
        is_weekend INTEGER NOT NULL,
        hash_value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dim_weather_code (
        weather_code TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        hash_value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS fact_covid (
        country_id INTEGER NOT NULL,
        date_id INTEGER NOT NULL,
        confirmed_cases INTEGER NOT NULL,
        deaths INTEGER NOT NULL,
        recovered INTEGER NOT NULL,
        hash_value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (country_id, date_id)
    )",
    "CREATE TABLE IF NOT EXISTS fact_weather (
        country_id INTEGER NOT NULL,
        date_id INTEGER NOT NULL,
        weather_code TEXT NOT NULL,
        mean_temperature REAL NOT NULL,
        mean_surface_pressure REAL NOT NULL,
        precipitation_sum REAL NOT NULL,
        relative_humidity REAL NOT NULL,
        wind_speed REAL NOT NULL,
        hash_value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (country_id, date_id)
    )",
];

#[cfg(test)]
pub(crate) async fn test_db() -> Db {
    // Single connection so the in-memory database is shared by every query.
    let db = Db::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory sqlite");
    db.run_migrations().await.expect("migrations");
    db
}
