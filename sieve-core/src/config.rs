use std::env;

use crate::errors::{ConfigError, SieveError};

const DEFAULT_METADATA_KEY: &str = "sieve";

/// Runtime knobs for the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on rows evaluated concurrently inside the filter and map
    /// stages. Result order never depends on it.
    pub row_concurrency: usize,
    /// Message key under which run warnings and errors are attached.
    pub metadata_key: String,
    /// Whether compiled expressions are reused across evaluations.
    pub cache_expressions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            row_concurrency: 1,
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            cache_expressions: true,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `SIEVE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix("SIEVE_")
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `SIEVE_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}{}", prefix, suffix);
        let defaults = Self::default();

        let concurrency_key = key("ROW_CONCURRENCY");
        let row_concurrency = match env::var(&concurrency_key) {
            Ok(raw) => parse_concurrency(&concurrency_key, &raw)?,
            Err(_) => defaults.row_concurrency,
        };

        let metadata_key = env::var(key("METADATA_KEY"))
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or(defaults.metadata_key);

        let cache_key = key("CACHE_EXPRESSIONS");
        let cache_expressions = match env::var(&cache_key) {
            Ok(raw) => parse_flag(&cache_key, &raw)?,
            Err(_) => defaults.cache_expressions,
        };

        Ok(Self {
            row_concurrency,
            metadata_key,
            cache_expressions,
        })
    }

    pub fn with_row_concurrency(mut self, row_concurrency: usize) -> Self {
        self.row_concurrency = row_concurrency.max(1);
        self
    }

    pub fn with_metadata_key(mut self, metadata_key: impl Into<String>) -> Self {
        self.metadata_key = metadata_key.into();
        self
    }
}

fn parse_concurrency(key: &str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value >= 1 => Ok(value),
        Ok(_) => Err(invalid(key, raw, "must be at least 1")),
        Err(err) => Err(invalid(key, raw, &err.to_string())),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean flag")),
    }
}

fn invalid(key: &str, raw: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidEnvVar {
        key: key.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Helper that loads config and converts to the canonical sieve error type.
pub fn load_engine_config() -> Result<EngineConfig, SieveError> {
    Ok(EngineConfig::from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own prefix so parallel test threads never race on the
    // same variables.

    #[test]
    fn loads_defaults_when_unset() {
        let cfg = EngineConfig::from_env_with_prefix("SIEVE_TEST_UNSET_").expect("config");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn reads_prefixed_overrides() {
        std::env::set_var("SIEVE_TEST_A_ROW_CONCURRENCY", "4");
        std::env::set_var("SIEVE_TEST_A_METADATA_KEY", "meta");
        std::env::set_var("SIEVE_TEST_A_CACHE_EXPRESSIONS", "off");
        let cfg = EngineConfig::from_env_with_prefix("SIEVE_TEST_A_").expect("config");
        assert_eq!(cfg.row_concurrency, 4);
        assert_eq!(cfg.metadata_key, "meta");
        assert!(!cfg.cache_expressions);
    }

    #[test]
    fn rejects_zero_concurrency() {
        std::env::set_var("SIEVE_TEST_B_ROW_CONCURRENCY", "0");
        let err = EngineConfig::from_env_with_prefix("SIEVE_TEST_B_").unwrap_err();
        assert!(err.to_string().contains("SIEVE_TEST_B_ROW_CONCURRENCY"));
    }
}
