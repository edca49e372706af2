//! File staging area: artifact naming, lifecycle directories, serialized
//! payloads and the heuristic row count.
//!
//! An artifact is one country's API response for one batch date, named
//! `<kind>_<countryCode>_<batchDate>.json`. Artifacts move between
//! `raw/<kind>`, `processed/<kind>` and `error/<kind>`; artifacts whose name
//! cannot be resolved land in `error/unknown`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Weather,
    Covid,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Weather, DataKind::Covid];

    pub fn dir_name(&self) -> &'static str {
        match self {
            DataKind::Weather => "weather_data",
            DataKind::Covid => "covid_data",
        }
    }
}

/// Root of the partitioned artifact tree.
#[derive(Debug, Clone)]
pub struct DataRoot {
    base: PathBuf,
}

impl DataRoot {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn from_env() -> Self {
        Self::new(crate::util::env::env_opt("DATA_ROOT").unwrap_or_else(|| "data".to_string()))
    }

    pub fn raw(&self, kind: DataKind) -> PathBuf {
        self.base.join("raw").join(kind.dir_name())
    }

    pub fn processed(&self, kind: DataKind) -> PathBuf {
        self.base.join("processed").join(kind.dir_name())
    }

    pub fn error(&self, kind: DataKind) -> PathBuf {
        self.base.join("error").join(kind.dir_name())
    }

    /// Bucket for artifacts whose identity could not be resolved from the
    /// file name.
    pub fn error_unknown(&self) -> PathBuf {
        self.base.join("error").join("unknown")
    }
}

pub fn artifact_file_name(kind: DataKind, country_code: &str, batch_date: NaiveDate) -> String {
    format!("{}_{}_{}.json", kind.dir_name(), country_code, batch_date)
}

/// Splits an artifact name into (country_code, batch_date). The batch date is
/// the last `_` segment (before `.json`), the country code the one before it;
/// anything that does not fit the pattern, including a non-calendar date, is
/// rejected.
pub fn parse_artifact_name(file_name: &str) -> Option<(String, NaiveDate)> {
    let stem = file_name.strip_suffix(".json")?;
    let mut segments = stem.rsplitn(3, '_');
    let date_part = segments.next()?;
    let code = segments.next()?;
    // The remainder is the kind prefix; it must exist but is dictated by the
    // directory the artifact sits in.
    segments.next()?;

    if code.is_empty() {
        return None;
    }
    let batch_date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((code.to_string(), batch_date))
}

/// A payload written to a temporary sibling, promoted to its final name only
/// after the ledger record is completed. Keeps the ledger and the filesystem
/// from disagreeing when a write dies halfway.
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl StagedFile {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn file_name(&self) -> String {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Atomic rename onto the final name, overwriting prior content.
    pub fn promote(self) -> Result<PathBuf> {
        fs::rename(&self.temp_path, &self.final_path)
            .with_context(|| format!("promoting {}", self.final_path.display()))?;
        Ok(self.final_path)
    }
}

/// Serializes a body (structured JSON or a plain string wrapped as a JSON
/// string) into `dir`, creating the directory if absent.
pub fn stage(body: &Value, dir: &Path, file_name: &str) -> Result<StagedFile> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let final_path = dir.join(file_name);
    let temp_path = dir.join(format!("{file_name}.tmp"));
    let serialized = serde_json::to_string_pretty(body)?;
    fs::write(&temp_path, serialized)
        .with_context(|| format!("writing {}", temp_path.display()))?;
    Ok(StagedFile {
        temp_path,
        final_path,
    })
}

/// Moves an artifact into another lifecycle directory, creating it as needed.
/// Returns the new location.
pub fn relocate(file: &Path, target_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(target_dir)
        .with_context(|| format!("creating {}", target_dir.display()))?;
    let file_name = file
        .file_name()
        .with_context(|| format!("no file name in {}", file.display()))?;
    let target = target_dir.join(file_name);
    fs::rename(file, &target)
        .with_context(|| format!("moving {} to {}", file.display(), target.display()))?;
    Ok(target)
}

/// Heuristic row count of a staged artifact, consumed for observability
/// metrics only: 1 for a plain string, per-key `len(value)` (collections) or
/// 1 (scalars) summed for an object, 0 when the file is absent or
/// undecodable.
pub fn row_count(dir: &Path, file_name: &str) -> i64 {
    row_count_at(&dir.join(file_name))
}

pub fn row_count_at(path: &Path) -> i64 {
    let Ok(text) = fs::read_to_string(path) else {
        return 0;
    };
    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        return 0;
    };
    match value {
        Value::String(_) => 1,
        Value::Object(map) => map
            .values()
            .map(|v| match v {
                Value::Array(items) => items.len() as i64,
                Value::Object(inner) => inner.len() as i64,
                _ => 1,
            })
            .sum(),
        _ => 0,
    }
}

/// All regular files directly under `dir`, sorted by name; empty when the
/// directory does not exist yet.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}
