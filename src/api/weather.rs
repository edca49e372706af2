use chrono::NaiveDate;
use serde_json::Value;

use super::{query_string, SourceApi};
use crate::registry::Country;
use crate::staging::DataKind;

/// Every daily variable the upstream archive exposes. The transform stage
/// only validates a subset, but extraction stages the full payload so later
/// reprocessing does not need a re-fetch.
const DAILY_FIELDS: &[&str] = &[
    "weather_code",
    "temperature_2m_mean",
    "surface_pressure_mean",
    "relative_humidity_2m_mean",
    "temperature_2m_max",
    "temperature_2m_min",
    "apparent_temperature_max",
    "apparent_temperature_min",
    "rain_sum",
    "showers_sum",
    "snowfall_sum",
    "precipitation_sum",
    "precipitation_hours",
    "precipitation_probability_max",
    "sunrise",
    "sunset",
    "daylight_duration",
    "uv_index_max",
    "sunshine_duration",
    "uv_index_clear_sky_max",
    "wind_speed_10m_max",
    "wind_gusts_10m_max",
    "wind_direction_10m_dominant",
    "shortwave_radiation_sum",
    "et0_fao_evapotranspiration",
    "apparent_temperature_mean",
    "cloud_cover_mean",
    "cloud_cover_max",
    "cloud_cover_min",
    "dew_point_2m_mean",
    "dew_point_2m_max",
    "dew_point_2m_min",
    "surface_pressure_max",
    "surface_pressure_min",
    "visibility_mean",
    "visibility_min",
    "visibility_max",
    "wind_gusts_10m_mean",
    "wind_speed_10m_mean",
    "wind_speed_10m_min",
    "wind_gusts_10m_min",
    "relative_humidity_2m_min",
    "relative_humidity_2m_max",
    "precipitation_probability_min",
    "precipitation_probability_mean",
    "pressure_msl_min",
    "pressure_msl_max",
    "pressure_msl_mean",
    "snowfall_water_equivalent_sum",
    "wet_bulb_temperature_2m_min",
    "wet_bulb_temperature_2m_max",
    "wet_bulb_temperature_2m_mean",
    "vapour_pressure_deficit_max",
];

/// Typed query parameters for one weather request.
#[derive(Debug, Clone)]
pub struct WeatherParams {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub daily: String,
    pub timezone: String,
}

impl WeatherParams {
    pub fn new(country: &Country, date: NaiveDate) -> Self {
        Self {
            latitude: country.latitude,
            longitude: country.longitude,
            start_date: date,
            end_date: date,
            daily: DAILY_FIELDS.join(","),
            timezone: "Europe/Berlin".to_string(),
        }
    }

    pub fn to_query(&self) -> String {
        query_string(&[
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("start_date", self.start_date.to_string()),
            ("end_date", self.end_date.to_string()),
            ("daily", self.daily.clone()),
            ("timezone", self.timezone.clone()),
        ])
    }
}

/// Daily historical weather per country. Error detail lives in the flat
/// `reason` field.
pub struct WeatherApi {
    api_id: i64,
    base_url: String,
}

impl WeatherApi {
    pub fn new(api_id: i64, base_url: String) -> Self {
        Self { api_id, base_url }
    }
}

impl SourceApi for WeatherApi {
    fn api_id(&self) -> i64 {
        self.api_id
    }

    fn kind(&self) -> DataKind {
        DataKind::Weather
    }

    fn endpoint(&self, country: &Country, date: NaiveDate) -> String {
        let params = WeatherParams::new(country, date);
        format!("{}?{}", self.base_url, params.to_query())
    }

    fn error_message(&self, body: &Value) -> String {
        body.get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}
