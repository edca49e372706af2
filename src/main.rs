use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use weather_covid_etl::api::{CovidApi, SourceApi, WeatherApi};
use weather_covid_etl::db::Db;
use weather_covid_etl::load::Loader;
use weather_covid_etl::staging::DataRoot;
use weather_covid_etl::tracing::init_tracing;
use weather_covid_etl::transform::weather_codes::WeatherCodeLookup;
use weather_covid_etl::util::env::{db_url, init_env};
use weather_covid_etl::{extract, registry, transform};

const WEATHER_API_NAME: &str = "Weather API";
const COVID_API_NAME: &str = "COVID API";
const WEATHER_API_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const COVID_API_URL: &str = "https://covid-api.com/api/reports/total";

#[derive(Parser)]
#[command(name = "etl", version, about = "Daily weather and COVID warehouse pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema and seed the API registry.
    Init,
    /// Register a country for extraction.
    AddCountry {
        /// ISO 3166-1 alpha-3 code, e.g. MDA.
        code: String,
        name: String,
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
    },
    /// Fetch raw artifacts for every registered country.
    Extract {
        /// Observation date requested upstream. Defaults to yesterday.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Batch date stamped into artifact names. Defaults to the
        /// observation date.
        #[arg(long)]
        batch_date: Option<NaiveDate>,
    },
    /// Validate raw artifacts into the staging tables.
    Transform,
    /// Merge the staging tables into the warehouse.
    Load,
    /// Extract, transform and load in one go.
    Run {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        batch_date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();
    let db = Db::connect(&db_url(), 5).await?;
    let root = DataRoot::from_env();

    match cli.command {
        Command::Init => {
            db.run_migrations().await?;
            seed_api_registry(&db).await?;
            info!("schema ready, api registry seeded");
        }
        Command::AddCountry { code, name, latitude, longitude } => {
            registry::add_country(&db, &code, &name, latitude, longitude).await?;
        }
        Command::Extract { date, batch_date } => {
            let date = date.unwrap_or_else(yesterday);
            extract_stage(&db, &root, date, batch_date.unwrap_or(date)).await?;
        }
        Command::Transform => {
            transform_stage(&db, &root).await?;
        }
        Command::Load => {
            Loader::new(&db).run().await?;
        }
        Command::Run { date, batch_date } => {
            let date = date.unwrap_or_else(yesterday);
            // A failed extraction aborts the run; stale raw artifacts must
            // not reach the warehouse under a fresh batch date.
            extract_stage(&db, &root, date, batch_date.unwrap_or(date)).await?;
            transform_stage(&db, &root).await?;
            Loader::new(&db).run().await?;
        }
    }
    Ok(())
}

fn yesterday() -> NaiveDate {
    Utc::now().date_naive() - Duration::days(1)
}

async fn seed_api_registry(db: &Db) -> Result<()> {
    for (name, url) in [(WEATHER_API_NAME, WEATHER_API_URL), (COVID_API_NAME, COVID_API_URL)] {
        sqlx::query("INSERT OR IGNORE INTO api_info (api_name, api_base_url) VALUES (?, ?)")
            .bind(name)
            .bind(url)
            .execute(&db.pool)
            .await
            .with_context(|| format!("seeding api registry entry '{name}'"))?;
    }
    Ok(())
}

async fn build_sources(db: &Db) -> Result<Vec<Box<dyn SourceApi>>> {
    let weather = registry::find_api(db, WEATHER_API_NAME).await?;
    let covid = registry::find_api(db, COVID_API_NAME).await?;
    Ok(vec![
        Box::new(WeatherApi::new(weather.id, weather.api_base_url)),
        Box::new(CovidApi::new(covid.id, covid.api_base_url)),
    ])
}

async fn extract_stage(db: &Db, root: &DataRoot, date: NaiveDate, batch_date: NaiveDate) -> Result<()> {
    let sources = build_sources(db).await?;
    let countries = registry::fetch_countries(db).await?;
    info!(%date, %batch_date, countries = countries.len(), "extraction starting");
    extract::run(db, root, &sources, &countries, date, batch_date).await
}

async fn transform_stage(db: &Db, root: &DataRoot) -> Result<()> {
    let countries = registry::by_code(registry::fetch_countries(db).await?);
    let lookup = WeatherCodeLookup::from_env_path()?;
    transform::run(db, root, &countries, &lookup).await
}
