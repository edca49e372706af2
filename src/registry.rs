//! Read-only reference data: the country table and the API registry.
//!
//! The pipeline never writes here during a run; `add_country` exists for the
//! administrator CLI only.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::Row;
use tracing::info;

use crate::db::Db;

#[derive(Debug, Clone, PartialEq)]
pub struct Country {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct ApiInfo {
    pub id: i64,
    pub api_name: String,
    pub api_base_url: String,
}

pub async fn fetch_countries(db: &Db) -> Result<Vec<Country>> {
    let rows = sqlx::query("SELECT id, code, name, latitude, longitude FROM country ORDER BY id")
        .fetch_all(&db.pool)
        .await
        .context("fetching countries")?;
    Ok(rows
        .into_iter()
        .map(|r| Country {
            id: r.get("id"),
            code: r.get("code"),
            name: r.get("name"),
            latitude: r.get("latitude"),
            longitude: r.get("longitude"),
        })
        .collect())
}

/// Countries indexed by ISO code, the shape the transform stage resolves
/// artifact identity against.
pub fn by_code(countries: Vec<Country>) -> HashMap<String, Country> {
    countries.into_iter().map(|c| (c.code.clone(), c)).collect()
}

pub async fn fetch_api_info(db: &Db) -> Result<Vec<ApiInfo>> {
    let rows = sqlx::query("SELECT id, api_name, api_base_url FROM api_info ORDER BY id")
        .fetch_all(&db.pool)
        .await
        .context("fetching api registry")?;
    Ok(rows
        .into_iter()
        .map(|r| ApiInfo {
            id: r.get("id"),
            api_name: r.get("api_name"),
            api_base_url: r.get("api_base_url"),
        })
        .collect())
}

pub async fn find_api(db: &Db, api_name: &str) -> Result<ApiInfo> {
    fetch_api_info(db)
        .await?
        .into_iter()
        .find(|a| a.api_name == api_name)
        .with_context(|| format!("api '{api_name}' not registered in api_info"))
}

/// Administrator-only insert; the ETL run itself treats the registry as
/// immutable.
pub async fn add_country(
    db: &Db,
    code: &str,
    name: &str,
    latitude: f64,
    longitude: f64,
) -> Result<i64> {
    let res = sqlx::query("INSERT INTO country (code, name, latitude, longitude) VALUES (?, ?, ?, ?)")
        .bind(code)
        .bind(name)
        .bind(latitude)
        .bind(longitude)
        .execute(&db.pool)
        .await
        .with_context(|| format!("inserting country {code}"))?;
    let id = res.last_insert_rowid();
    info!(country = %code, id, "country registered");
    Ok(id)
}
