//! Detector configuration
//!
//! Every setting is optional and read from the environment. Unparsable values
//! are rejected rather than silently replaced by defaults.

use crate::error::DetectorError;
use crate::logging::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_DATABASE: &str = "sleep_detector";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// SQLite database file
    pub db_path: PathBuf,
    /// Bound on every store call (seconds)
    pub store_timeout_secs: u64,
    /// Inclusive lower bound of valid samples (bpm)
    pub hr_valid_low: u16,
    /// Inclusive upper bound of valid samples (bpm)
    pub hr_valid_high: u16,
    /// Tick period (seconds)
    pub tick_interval_secs: u64,
    /// Minimum episode duration (minutes), read from `MINIMAL_SLEEP_HOURS`
    pub minimal_sleep_minutes: u32,
    /// Activity debounce window (seconds)
    pub active_flag_timeout_secs: u64,
    /// Number of recent episodes the threshold is derived from
    pub threshold_samples: usize,
    /// Sleep onset webhook; unset means log only
    pub webhook_url: Option<String>,
    /// Bound on the webhook POST (seconds)
    pub webhook_timeout_secs: u64,
    /// HTTP listen address
    pub bind_addr: String,
    pub log: LogConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(format!("{DEFAULT_DB_DATABASE}.db")),
            store_timeout_secs: 5,
            hr_valid_low: 40,
            hr_valid_high: 90,
            tick_interval_secs: 60,
            minimal_sleep_minutes: 3,
            active_flag_timeout_secs: 120,
            threshold_samples: 7,
            webhook_url: None,
            webhook_timeout_secs: 5,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log: LogConfig::default(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, DetectorError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| DetectorError::Config {
                key: key.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DetectorConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, DetectorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DetectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = match non_empty(&lookup, "DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let database = non_empty(&lookup, "DB_DATABASE")
                    .unwrap_or_else(|| DEFAULT_DB_DATABASE.to_string());
                PathBuf::from(format!("{database}.db"))
            }
        };

        let config = Self {
            db_path,
            store_timeout_secs: parse_var(&lookup, "STORE_TIMEOUT", defaults.store_timeout_secs)?,
            hr_valid_low: parse_var(&lookup, "HR_VALID_LOW", defaults.hr_valid_low)?,
            hr_valid_high: parse_var(&lookup, "HR_VALID_HIGH", defaults.hr_valid_high)?,
            tick_interval_secs: parse_var(
                &lookup,
                "WORKER_TICK_INTERVAL",
                defaults.tick_interval_secs,
            )?,
            minimal_sleep_minutes: parse_var(
                &lookup,
                "MINIMAL_SLEEP_HOURS",
                defaults.minimal_sleep_minutes,
            )?,
            active_flag_timeout_secs: parse_var(
                &lookup,
                "ACTIVE_FLAG_TIMEOUT",
                defaults.active_flag_timeout_secs,
            )?,
            threshold_samples: parse_var(
                &lookup,
                "HR_THRESHOLD_SAMPLES",
                defaults.threshold_samples,
            )?,
            webhook_url: non_empty(&lookup, "WEBHOOK_URL"),
            webhook_timeout_secs: parse_var(
                &lookup,
                "WEBHOOK_TIMEOUT",
                defaults.webhook_timeout_secs,
            )?,
            bind_addr: non_empty(&lookup, "BIND_ADDR").unwrap_or(defaults.bind_addr),
            log: LogConfig {
                level: non_empty(&lookup, "LOG_LEVEL").unwrap_or(defaults.log.level),
                format: parse_var::<LogFormat, _>(&lookup, "LOG_FORMAT", defaults.log.format)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.hr_valid_low > self.hr_valid_high {
            return Err(DetectorError::Config {
                key: "HR_VALID_LOW".to_string(),
                value: format!("{} exceeds HR_VALID_HIGH {}", self.hr_valid_low, self.hr_valid_high),
            });
        }
        let positive = [
            ("WORKER_TICK_INTERVAL", self.tick_interval_secs),
            ("STORE_TIMEOUT", self.store_timeout_secs),
            ("WEBHOOK_TIMEOUT", self.webhook_timeout_secs),
            ("ACTIVE_FLAG_TIMEOUT", self.active_flag_timeout_secs),
            ("HR_THRESHOLD_SAMPLES", self.threshold_samples as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(DetectorError::Config {
                    key: key.to_string(),
                    value: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn active_flag_timeout(&self) -> Duration {
        Duration::from_secs(self.active_flag_timeout_secs)
    }

    pub fn minimal_sleep(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minimal_sleep_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = DetectorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DetectorConfig::default());
        assert_eq!(config.db_path, PathBuf::from("sleep_detector.db"));
        assert_eq!(config.minimal_sleep(), chrono::Duration::minutes(3));
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = DetectorConfig::from_lookup(lookup(&[
            ("DB_DATABASE", "nightly"),
            ("HR_VALID_LOW", "45"),
            ("HR_VALID_HIGH", "80"),
            ("WORKER_TICK_INTERVAL", "20"),
            ("MINIMAL_SLEEP_HOURS", "90"),
            ("ACTIVE_FLAG_TIMEOUT", "30"),
            ("HR_THRESHOLD_SAMPLES", "5"),
            ("WEBHOOK_URL", "http://hooks.local/sleep"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("nightly.db"));
        assert_eq!((config.hr_valid_low, config.hr_valid_high), (45, 80));
        assert_eq!(config.tick_interval_secs, 20);
        assert_eq!(config.minimal_sleep(), chrono::Duration::minutes(90));
        assert_eq!(config.active_flag_timeout(), Duration::from_secs(30));
        assert_eq!(config.threshold_samples, 5);
        assert_eq!(config.webhook_url.as_deref(), Some("http://hooks.local/sleep"));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_db_path_wins_over_database() {
        let config = DetectorConfig::from_lookup(lookup(&[
            ("DB_PATH", "/var/lib/sleep/data.db"),
            ("DB_DATABASE", "ignored"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/sleep/data.db"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = DetectorConfig::from_lookup(lookup(&[("HR_VALID_LOW", "forty")])).unwrap_err();
        match err {
            DetectorError::Config { key, value } => {
                assert_eq!(key, "HR_VALID_LOW");
                assert_eq!(value, "forty");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_inverted_band_rejected() {
        let result = DetectorConfig::from_lookup(lookup(&[
            ("HR_VALID_LOW", "90"),
            ("HR_VALID_HIGH", "40"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = DetectorConfig::from_lookup(lookup(&[("WORKER_TICK_INTERVAL", "0")]));
        assert!(result.is_err());
    }
}
