//! TOML configuration for the cache, freshness policy, provider and calendar.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. Example:
//!
//! ```toml
//! [cache]
//! root = "data/quotecache"
//! write_policy = "replace_stale"
//!
//! [freshness]
//! cutoff = "00:30:00"
//! utc_offset_minutes = 0
//!
//! [provider]
//! max_parallel = 4
//! ```

use crate::data::freshness::FreshnessPolicy;
use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on `provider.max_retries`.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What `put` does when an entry for the symbol already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Replace the entry only once it has gone stale.
    #[default]
    ReplaceStale,
    /// Never replace; the first write for a symbol is kept forever.
    WriteOnce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, every lookup misses and nothing is written.
    pub enabled: bool,
    pub root: PathBuf,
    pub write_policy: WritePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("data/quotecache"),
            write_policy: WritePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Time of day after which the provider's previous-day bar is final.
    pub cutoff: NaiveTime,
    /// Offset in which calendar dates and the cutoff are evaluated.
    pub utc_offset_minutes: i32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        let policy = FreshnessPolicy::default();
        Self {
            cutoff: policy.cutoff(),
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Upper bound on concurrent requests inside one batch.
    pub max_parallel: usize,
    /// Consecutive failures before the circuit breaker opens.
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query2.finance.yahoo.com".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            max_parallel: 4,
            breaker_threshold: 3,
            breaker_cooldown_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Long-listed symbol whose history defines the trading-day calendar.
    pub reference_symbol: String,
    /// Symbol quoting the short-term treasury yield in percent.
    pub risk_free_symbol: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            reference_symbol: "ED".into(),
            risk_free_symbol: "^IRX".into(),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteCacheConfig {
    pub cache: CacheConfig,
    pub freshness: FreshnessConfig,
    pub provider: ProviderConfig,
    pub calendar: CalendarConfig,
}

impl QuoteCacheConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "provider.max_parallel must be at least 1".into(),
            ));
        }
        if self.provider.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "provider.max_retries must be at most {MAX_RETRIES}"
            )));
        }
        if self.provider.breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "provider.breaker_threshold must be at least 1".into(),
            ));
        }
        if self.calendar.reference_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "calendar.reference_symbol must not be empty".into(),
            ));
        }
        self.freshness_policy().map(|_| ())
    }

    /// The freshness policy described by the `[freshness]` section.
    pub fn freshness_policy(&self) -> Result<FreshnessPolicy, ConfigError> {
        let minutes = self.freshness.utc_offset_minutes;
        let offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "freshness.utc_offset_minutes out of range: {minutes}"
            ))
        })?;
        Ok(FreshnessPolicy::new(self.freshness.cutoff, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = QuoteCacheConfig::from_toml("").unwrap();
        assert_eq!(config, QuoteCacheConfig::default());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.write_policy, WritePolicy::ReplaceStale);
        assert_eq!(config.freshness_policy().unwrap(), FreshnessPolicy::default());
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = QuoteCacheConfig::from_toml(
            r#"
            [cache]
            enabled = false
            write_policy = "write_once"

            [freshness]
            cutoff = "01:15:00"
            utc_offset_minutes = -300
            "#,
        )
        .unwrap();

        assert!(!config.cache.enabled);
        assert_eq!(config.cache.write_policy, WritePolicy::WriteOnce);
        assert_eq!(config.cache.root, PathBuf::from("data/quotecache"));
        let policy = config.freshness_policy().unwrap();
        assert_eq!(policy.cutoff(), NaiveTime::from_hms_opt(1, 15, 0).unwrap());
        assert_eq!(policy.offset(), FixedOffset::west_opt(5 * 3600).unwrap());
        assert_eq!(config.provider.max_parallel, 4);
    }

    #[test]
    fn toml_roundtrip() {
        let config = QuoteCacheConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(QuoteCacheConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let err = QuoteCacheConfig::from_toml("[freshness]\nutc_offset_minutes = 100000\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = QuoteCacheConfig::from_toml("[provider]\nmax_parallel = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn rejects_excessive_retries() {
        assert!(QuoteCacheConfig::from_toml("[provider]\nmax_retries = 10\n").is_ok());
        let err = QuoteCacheConfig::from_toml("[provider]\nmax_retries = 40\n").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = QuoteCacheConfig::from_file(Path::new("/nonexistent/quotecache.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
