//! Expected payload shapes and field-level validation for staged artifacts.
//!
//! Anything the serde layer cannot coerce (missing field, wrong type, a
//! plain-string body staged from an error response) is a shape failure; the
//! artifact is preserved untouched for inspection.

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("artifact unreadable: {0}")]
    Read(#[from] std::io::Error),
    #[error("payload shape mismatch: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("daily series lengths differ")]
    SeriesLengthMismatch,
}

#[derive(Debug, Deserialize)]
pub struct WeatherPayload {
    pub daily: DailySeries,
}

/// Parallel per-day series; every required field must be present, well-typed
/// and of equal length.
#[derive(Debug, Deserialize)]
pub struct DailySeries {
    pub time: Vec<NaiveDate>,
    pub weather_code: Vec<i64>,
    pub temperature_2m_mean: Vec<f64>,
    pub surface_pressure_mean: Vec<f64>,
    pub precipitation_sum: Vec<f64>,
    pub relative_humidity_2m_mean: Vec<f64>,
    pub wind_speed_10m_mean: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CovidPayload {
    pub data: CovidDaily,
}

#[derive(Debug, Deserialize)]
pub struct CovidDaily {
    pub date: NaiveDate,
    pub confirmed_diff: i64,
    pub deaths_diff: i64,
    pub recovered_diff: i64,
}

/// One normalized weather observation, pre-lookup and pre-snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub date: NaiveDate,
    pub weather_code: i64,
    pub mean_temperature: f64,
    pub mean_surface_pressure: f64,
    pub precipitation_sum: f64,
    pub relative_humidity: f64,
    pub wind_speed: f64,
}

pub fn parse_weather(text: &str) -> Result<Vec<WeatherObservation>, ValidationError> {
    let payload: WeatherPayload = serde_json::from_str(text)?;
    let d = payload.daily;

    let n = d.time.len();
    let all_equal = [
        d.weather_code.len(),
        d.temperature_2m_mean.len(),
        d.surface_pressure_mean.len(),
        d.precipitation_sum.len(),
        d.relative_humidity_2m_mean.len(),
        d.wind_speed_10m_mean.len(),
    ]
    .iter()
    .all(|&len| len == n);
    if !all_equal {
        return Err(ValidationError::SeriesLengthMismatch);
    }

    Ok((0..n)
        .map(|i| WeatherObservation {
            date: d.time[i],
            weather_code: d.weather_code[i],
            mean_temperature: d.temperature_2m_mean[i],
            mean_surface_pressure: d.surface_pressure_mean[i],
            precipitation_sum: d.precipitation_sum[i],
            relative_humidity: d.relative_humidity_2m_mean[i],
            wind_speed: d.wind_speed_10m_mean[i],
        })
        .collect())
}

pub fn parse_covid(text: &str) -> Result<CovidDaily, ValidationError> {
    let payload: CovidPayload = serde_json::from_str(text)?;
    Ok(payload.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEATHER_OK: &str = r#"{
        "daily": {
            "time": ["2024-03-01"],
            "weather_code": [3],
            "temperature_2m_mean": [5.1],
            "surface_pressure_mean": [1012.3],
            "precipitation_sum": [0.0],
            "relative_humidity_2m_mean": [80.0],
            "wind_speed_10m_mean": [12.4]
        }
    }"#;

    #[test]
    fn complete_weather_payload_yields_one_observation() {
        let obs = parse_weather(WEATHER_OK).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].weather_code, 3);
        assert_eq!(obs[0].mean_temperature, 5.1);
        assert_eq!(obs[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn missing_weather_code_is_a_shape_failure() {
        let text = WEATHER_OK.replace("\"weather_code\": [3],", "");
        assert!(matches!(
            parse_weather(&text),
            Err(ValidationError::Shape(_))
        ));
    }

    #[test]
    fn wrong_type_is_a_shape_failure() {
        let text = WEATHER_OK.replace("[3]", "[\"three\"]");
        assert!(matches!(
            parse_weather(&text),
            Err(ValidationError::Shape(_))
        ));
    }

    #[test]
    fn ragged_series_are_rejected() {
        let text = WEATHER_OK.replace("[12.4]", "[12.4, 9.9]");
        assert!(matches!(
            parse_weather(&text),
            Err(ValidationError::SeriesLengthMismatch)
        ));
    }

    #[test]
    fn staged_plain_string_fails_shape_validation() {
        // An upstream error body staged as a JSON string literal.
        assert!(parse_weather("\"<html>bad gateway</html>\"").is_err());
        assert!(parse_covid("\"rate limited\"").is_err());
    }

    #[test]
    fn covid_delta_parses() {
        let text = r#"{"data": {"date": "2024-03-01", "confirmed_diff": 12, "deaths_diff": 0, "recovered_diff": 3}}"#;
        let daily = parse_covid(text).unwrap();
        assert_eq!(daily.confirmed_diff, 12);
        assert_eq!(daily.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
