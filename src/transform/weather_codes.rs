//! Static WMO 4677 code → description lookup, loaded read-only from a
//! two-column CSV.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CSV_PATH: &str = "lookup/wmo_code_4677.csv";
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Weather Code")]
    code: String,
    #[serde(rename = "Description")]
    description: String,
}

#[derive(Debug, Clone)]
pub struct WeatherCodeLookup {
    map: HashMap<String, String>,
}

impl WeatherCodeLookup {
    pub fn from_env_path() -> Result<Self> {
        let path = crate::util::env::env_opt("WEATHER_CODES_CSV")
            .unwrap_or_else(|| DEFAULT_CSV_PATH.to_string());
        Self::from_csv_path(Path::new(&path))
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening weather code table {}", path.display()))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut map = HashMap::new();
        for row in rdr.deserialize::<CsvRow>() {
            let row = row.context("reading weather code table")?;
            map.insert(row.code, row.description);
        }
        Ok(Self { map })
    }

    /// Human-readable description for a numeric code. The table keys are
    /// zero-padded to two digits, so both spellings are tried; anything not
    /// in the table is "Unknown".
    pub fn describe(&self, code: i64) -> String {
        self.map
            .get(&code.to_string())
            .or_else(|| self.map.get(&format!("{code:02}")))
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Weather Code,Description\n03,Clouds generally forming or developing\n61,Continuous slight rain\n";

    #[test]
    fn known_codes_resolve_with_or_without_padding() {
        let lookup = WeatherCodeLookup::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(lookup.describe(3), "Clouds generally forming or developing");
        assert_eq!(lookup.describe(61), "Continuous slight rain");
    }

    #[test]
    fn missing_codes_default_to_unknown() {
        let lookup = WeatherCodeLookup::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(lookup.describe(999), "Unknown");
    }

    #[test]
    fn shipped_table_loads() {
        let lookup = WeatherCodeLookup::from_csv_path(Path::new(DEFAULT_CSV_PATH)).unwrap();
        assert_ne!(lookup.describe(95), "Unknown");
    }
}
