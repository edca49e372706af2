use chrono::NaiveDate;
use serde_json::Value;

use super::{query_string, SourceApi};
use crate::registry::Country;
use crate::staging::DataKind;

/// Typed query parameters for one covid report request.
#[derive(Debug, Clone)]
pub struct CovidParams {
    pub iso: String,
    pub date: NaiveDate,
}

impl CovidParams {
    pub fn new(country: &Country, date: NaiveDate) -> Self {
        Self {
            iso: country.code.clone(),
            date,
        }
    }

    pub fn to_query(&self) -> String {
        query_string(&[("iso", self.iso.clone()), ("date", self.date.to_string())])
    }
}

/// Daily covid delta per country. The upstream reports errors as a nested
/// map of field name to message list; it gets flattened into one string for
/// the ledger.
pub struct CovidApi {
    api_id: i64,
    base_url: String,
}

impl CovidApi {
    pub fn new(api_id: i64, base_url: String) -> Self {
        Self { api_id, base_url }
    }
}

impl SourceApi for CovidApi {
    fn api_id(&self) -> i64 {
        self.api_id
    }

    fn kind(&self) -> DataKind {
        DataKind::Covid
    }

    fn endpoint(&self, country: &Country, date: NaiveDate) -> String {
        let params = CovidParams::new(country, date);
        format!("{}?{}", self.base_url, params.to_query())
    }

    fn error_message(&self, body: &Value) -> String {
        let Some(map) = body.get("error").and_then(Value::as_object) else {
            return String::new();
        };
        map.values()
            .map(|v| match v {
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.as_str().unwrap_or_default().to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
