//! HTTP clients for the upstream observation APIs.
//!
//! Both variants share the same request/classify lifecycle; they differ only
//! in endpoint construction and in which response field carries error detail.

pub mod covid;
pub mod weather;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::registry::Country;
use crate::staging::DataKind;

pub use covid::CovidApi;
pub use weather::WeatherApi;

/// Fixed per-request timeout; a call that exceeds it is classified as a
/// transport failure, never retried.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Sentinel recorded when a response body cannot be decoded at all.
pub const NOT_FOUND: &str = "Not Found";

/// Undecoded HTTP response, enough to classify without holding the
/// connection open.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub text: String,
}

/// Outcome of classifying a raw response.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub end_time: NaiveDateTime,
    pub status_code: u16,
    pub error_message: String,
    /// Decoded JSON body, or the raw text as a JSON string when decoding
    /// failed. Either way it is stageable.
    pub body: Value,
}

pub fn build_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}

#[async_trait]
pub trait SourceApi: Send + Sync {
    fn api_id(&self) -> i64;
    fn kind(&self) -> DataKind;

    /// Full request URL for one country and observation date.
    fn endpoint(&self, country: &Country, date: NaiveDate) -> String;

    /// Pulls the variant-specific error detail out of a decoded body.
    fn error_message(&self, body: &Value) -> String;

    /// Sends the request. Transport failures (unreachable host, timeout) are
    /// not errors here; they yield `None` plus the attempt timestamp.
    async fn send_request(
        &self,
        client: &reqwest::Client,
        country: &Country,
        date: NaiveDate,
    ) -> (Option<RawResponse>, NaiveDateTime) {
        let url = self.endpoint(country, date);
        let start_time = Utc::now().naive_utc();

        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(country = %country.code, error = %e, "request failed");
                return (None, start_time);
            }
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(text) => (Some(RawResponse { status, text }), start_time),
            Err(e) => {
                warn!(country = %country.code, error = %e, "body read failed");
                (None, start_time)
            }
        }
    }

    /// Classifies a raw response. A body that is not valid JSON is the
    /// deliberate fallback path: status 404, raw text as body, the fixed
    /// "Not Found" sentinel as error detail.
    fn parse(&self, raw: RawResponse) -> Parsed {
        let end_time = Utc::now().naive_utc();
        match serde_json::from_str::<Value>(&raw.text) {
            Ok(body) => Parsed {
                end_time,
                status_code: raw.status,
                error_message: self.error_message(&body),
                body,
            },
            Err(_) => Parsed {
                end_time,
                status_code: 404,
                error_message: NOT_FOUND.to_string(),
                body: Value::String(raw.text),
            },
        }
    }
}

/// `key=value` join used by both endpoint builders.
pub(crate) fn query_string(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
pub(crate) fn test_country() -> Country {
    Country {
        id: 7,
        code: "MDA".to_string(),
        name: "Moldova".to_string(),
        latitude: 47.4116,
        longitude: 28.3699,
    }
}
