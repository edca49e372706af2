//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;

static INIT: Once = Once::new();

/// Load .env if present, exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Database URL for the warehouse. Falls back to a local SQLite file so the
/// pipeline is runnable out of the box.
pub fn db_url() -> String {
    env_opt("DATABASE_URL").unwrap_or_else(|| "sqlite://etl.db".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("ETL_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse::<u32>("ETL_TEST_PARSE", 7), 7);
        std::env::remove_var("ETL_TEST_PARSE");
    }

    #[test]
    fn env_flag_accepts_common_truthy_spellings() {
        for v in ["1", "true", "ON", "yes"] {
            std::env::set_var("ETL_TEST_FLAG", v);
            assert!(env_flag("ETL_TEST_FLAG", false), "value {v} should be true");
        }
        std::env::remove_var("ETL_TEST_FLAG");
        assert!(!env_flag("ETL_TEST_FLAG", false));
    }
}
