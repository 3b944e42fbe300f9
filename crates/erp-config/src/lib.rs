//! Fabric ERP configuration loading and validation.
//!
//! This crate provides:
//! - The typed `ErpConfig` tunables (retry thresholds, timeouts, delays)
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation

pub mod resolve;
pub mod validate;

pub use resolve::{resolve_config, ConfigPath, ConfigSource};
pub use validate::{validate_config, ValidationError, ValidationResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Recovery engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErpConfig {
    pub schema_version: String,
    /// Consecutive failed recoveries before a target is marked permanently failed.
    pub max_retries: u32,
    /// Timeout armed for every hardware request.
    pub request_timeout_ms: u64,
    /// Back-off before retrying a step that could not allocate a request.
    pub memwait_ms: u64,
    /// Exchange-config attempts while the host connection is initializing.
    pub exchange_config_retries: u32,
    /// First back-off between exchange-config attempts; doubles each time.
    pub exchange_config_first_delay_ms: u64,
    /// Pause after a failed adapter recovery before it is reported.
    pub failed_delay_ms: u64,
    /// Unsolicited status buffers handed to the adapter after open.
    pub status_read_primers: u32,
    /// Capacity of the in-memory event journal.
    pub event_history: usize,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            max_retries: 3,
            request_timeout_ms: 30_000,
            memwait_ms: 1_000,
            exchange_config_retries: 7,
            exchange_config_first_delay_ms: 100,
            failed_delay_ms: 8_000,
            status_read_primers: 16,
            event_history: 256,
        }
    }
}

impl ErpConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ErpConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Resolve the config path and load it, falling back to defaults.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, ConfigPath), ConfigError> {
        let resolved = resolve_config(cli_path);
        let config = match &resolved.path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok((config, resolved))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn memwait(&self) -> Duration {
        Duration::from_millis(self.memwait_ms)
    }

    pub fn failed_delay(&self) -> Duration {
        Duration::from_millis(self.failed_delay_ms)
    }

    /// Back-off before exchange-config attempt `attempt` (1-based retry count).
    pub fn exchange_config_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.exchange_config_first_delay_ms.saturating_mul(1 << shift))
    }

    /// Short timings for tests and simulations.
    pub fn fast() -> Self {
        Self {
            request_timeout_ms: 200,
            memwait_ms: 5,
            exchange_config_first_delay_ms: 1,
            failed_delay_ms: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(validate_config(&ErpConfig::default()).is_ok());
        assert!(validate_config(&ErpConfig::fast()).is_ok());
    }

    #[test]
    fn test_exchange_config_backoff_doubles() {
        let config = ErpConfig::default();
        assert_eq!(config.exchange_config_delay(1), Duration::from_millis(100));
        assert_eq!(config.exchange_config_delay(2), Duration::from_millis(200));
        assert_eq!(config.exchange_config_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ErpConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.status_read_primers, 16);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<ErpConfig, _> = serde_json::from_str(r#"{"max_retrys": 5}"#);
        assert!(result.is_err());
    }
}
