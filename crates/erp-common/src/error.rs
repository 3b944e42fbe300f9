//! Error types for the fabric ERP engine.
//!
//! Errors carry:
//! - Stable error codes for machine parsing
//! - A category from the recovery taxonomy
//! - A recoverability hint for automation
//!
//! Failures inside a strategy are never surfaced as `ErpError`; they are
//! absorbed by target checking and only show up as status changes
//! (`ERP_FAILED`) and journal entries. `ErpError` is what the public entry
//! points return to their callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::id::{Lun, PortId, TargetRef, Wwpn};

/// Result type alias for ERP operations.
pub type Result<T> = std::result::Result<T, ErpError>;

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request failed or timed out; the target may still be recoverable.
    Transient,
    /// Identifying information is invalid; never retried.
    Structural,
    /// Allocation failure while submitting a step.
    Resource,
    /// Replaced by a stronger action; not a failure.
    Superseded,
    /// Retry threshold exceeded; explicit re-arm required.
    Exhausted,
    /// Caller addressed a missing or busy target, or the engine is down.
    Usage,
    /// Configuration loading and validation.
    Config,
    /// File I/O and serialization.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Structural => write!(f, "structural"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::Superseded => write!(f, "superseded"),
            ErrorCategory::Exhausted => write!(f, "exhausted"),
            ErrorCategory::Usage => write!(f, "usage"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Failure to hand a request to the hardware-request layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitError {
    /// No request buffers available right now.
    #[error("no memory for request")]
    NoMemory,
    /// The adapter refused the request.
    #[error("device error: {0}")]
    Device(String),
}

/// Unified error type for the ERP crates.
#[derive(Error, Debug)]
pub enum ErpError {
    // Usage errors (10-19)
    #[error("no such target: {0}")]
    NoSuchTarget(TargetRef),

    #[error("target {0} still has recovery in progress")]
    TargetBusy(TargetRef),

    #[error("recovery worker is not running")]
    WorkerNotRunning,

    #[error("failed to spawn recovery worker: {0}")]
    WorkerSpawn(String),

    #[error("action does not apply to target {0}")]
    InvalidAction(TargetRef),

    #[error("a port with WWPN {0} already exists")]
    DuplicateWwpn(Wwpn),

    #[error("{port} already has a unit with LUN {lun}")]
    DuplicateLun { port: PortId, lun: Lun },

    // Recovery outcomes (20-29)
    #[error("target {0} is permanently failed; clear ERP_FAILED to re-arm")]
    TargetFailed(TargetRef),

    #[error("target {0} is not ready for I/O")]
    NotReady(TargetRef),

    #[error("recovery did not settle within {millis}ms")]
    QuiescenceTimeout { millis: u64 },

    #[error("request submission failed: {0}")]
    Submit(#[from] SubmitError),

    // Config / I/O errors (60-69)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErpError {
    /// Stable error code, grouped by range:
    /// - 10-19: usage errors
    /// - 20-29: recovery outcomes
    /// - 60-69: configuration and I/O
    pub fn code(&self) -> u32 {
        match self {
            ErpError::NoSuchTarget(_) => 10,
            ErpError::TargetBusy(_) => 11,
            ErpError::WorkerNotRunning => 12,
            ErpError::WorkerSpawn(_) => 13,
            ErpError::InvalidAction(_) => 14,
            ErpError::DuplicateWwpn(_) => 15,
            ErpError::DuplicateLun { .. } => 16,
            ErpError::TargetFailed(_) => 20,
            ErpError::NotReady(_) => 21,
            ErpError::QuiescenceTimeout { .. } => 22,
            ErpError::Submit(_) => 23,
            ErpError::Config(_) => 60,
            ErpError::Io(_) => 61,
            ErpError::Json(_) => 62,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErpError::NoSuchTarget(_)
            | ErpError::TargetBusy(_)
            | ErpError::WorkerNotRunning
            | ErpError::WorkerSpawn(_)
            | ErpError::InvalidAction(_)
            | ErpError::DuplicateWwpn(_)
            | ErpError::DuplicateLun { .. } => ErrorCategory::Usage,

            ErpError::TargetFailed(_) => ErrorCategory::Exhausted,
            ErpError::NotReady(_) | ErpError::QuiescenceTimeout { .. } => {
                ErrorCategory::Transient
            }
            ErpError::Submit(SubmitError::NoMemory) => ErrorCategory::Resource,
            ErpError::Submit(SubmitError::Device(_)) => ErrorCategory::Transient,

            ErpError::Config(_) => ErrorCategory::Config,
            ErpError::Io(_) | ErpError::Json(_) => ErrorCategory::Io,
        }
    }

    /// Whether retrying later can succeed without outside intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ErpError::NoSuchTarget(_) => false,
            ErpError::TargetBusy(_) => true, // wait for quiescence
            ErpError::WorkerNotRunning => false,
            ErpError::WorkerSpawn(_) => false,
            ErpError::InvalidAction(_) => false,
            ErpError::DuplicateWwpn(_) | ErpError::DuplicateLun { .. } => false,
            ErpError::TargetFailed(_) => false, // needs re-arm
            ErpError::NotReady(_) => true,
            ErpError::QuiescenceTimeout { .. } => true,
            ErpError::Submit(_) => true,
            ErpError::Config(_) => true,
            ErpError::Io(_) => true,
            ErpError::Json(_) => false,
        }
    }

    /// Short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            ErpError::NoSuchTarget(_) => "Unknown Target",
            ErpError::TargetBusy(_) => "Target Busy",
            ErpError::WorkerNotRunning => "Recovery Worker Down",
            ErpError::WorkerSpawn(_) => "Worker Spawn Failed",
            ErpError::InvalidAction(_) => "Invalid Recovery Action",
            ErpError::DuplicateWwpn(_) => "Duplicate Port",
            ErpError::DuplicateLun { .. } => "Duplicate Unit",
            ErpError::TargetFailed(_) => "Target Permanently Failed",
            ErpError::NotReady(_) => "Device Not Ready",
            ErpError::QuiescenceTimeout { .. } => "Recovery Still Running",
            ErpError::Submit(_) => "Request Submission Failed",
            ErpError::Config(_) => "Configuration Error",
            ErpError::Io(_) => "I/O Error",
            ErpError::Json(_) => "JSON Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&ErpError> for StructuredError {
    fn from(err: &ErpError) -> Self {
        let mut context = HashMap::new();
        match err {
            ErpError::NoSuchTarget(t)
            | ErpError::TargetBusy(t)
            | ErpError::InvalidAction(t)
            | ErpError::TargetFailed(t)
            | ErpError::NotReady(t) => {
                context.insert("target".to_string(), serde_json::json!(t));
            }
            ErpError::DuplicateWwpn(wwpn) => {
                context.insert("wwpn".to_string(), serde_json::json!(wwpn.to_string()));
            }
            ErpError::DuplicateLun { port, lun } => {
                context.insert("port".to_string(), serde_json::json!(port));
                context.insert("lun".to_string(), serde_json::json!(lun.to_string()));
            }
            ErpError::QuiescenceTimeout { millis } => {
                context.insert("timeout_ms".to_string(), serde_json::json!(millis));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
