//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::{ErpConfig, CONFIG_SCHEMA_VERSION};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("{} problems: {}", .0.len(), join(.0))]
    Multiple(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
            ValidationError::Multiple(_) => 67,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a configuration semantically, collecting every problem.
pub fn validate_config(config: &ErpConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();

    if config.schema_version != CONFIG_SCHEMA_VERSION {
        errors.push(ValidationError::VersionMismatch {
            expected: CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }
    if config.max_retries == 0 {
        errors.push(ValidationError::invalid("max_retries", "must be at least 1"));
    }
    if config.request_timeout_ms == 0 {
        errors.push(ValidationError::invalid(
            "request_timeout_ms",
            "a zero timeout fails every request",
        ));
    }
    if config.memwait_ms == 0 {
        errors.push(ValidationError::invalid(
            "memwait_ms",
            "must be positive or NoMem retries spin",
        ));
    }
    if config.exchange_config_retries == 0 {
        errors.push(ValidationError::invalid(
            "exchange_config_retries",
            "must be at least 1",
        ));
    }
    if config.exchange_config_first_delay_ms > config.request_timeout_ms {
        errors.push(ValidationError::invalid(
            "exchange_config_first_delay_ms",
            format!(
                "{}ms exceeds request_timeout_ms ({}ms)",
                config.exchange_config_first_delay_ms, config.request_timeout_ms
            ),
        ));
    }
    if config.event_history == 0 {
        errors.push(ValidationError::invalid("event_history", "must be at least 1"));
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_retries_rejected() {
        let config = ErpConfig {
            max_retries: 0,
            ..ErpConfig::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.code(), 65);
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_collects_multiple_problems() {
        let config = ErpConfig {
            request_timeout_ms: 0,
            memwait_ms: 0,
            ..ErpConfig::default()
        };
        match validate_config(&config) {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch() {
        let config = ErpConfig {
            schema_version: "0.9.0".to_string(),
            ..ErpConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::VersionMismatch { .. })
        ));
    }
}
