//! Exit codes for the erp-sim CLI.
//!
//! Exit code ranges:
//! - 0-2: Simulation outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors
//! - 20-29: Internal errors

use erp_common::{ErpError, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every target recovered.
    Clean = 0,

    /// Recovery settled with at least one target marked failed.
    TargetsFailed = 1,

    /// Recovery did not settle in time.
    Unsettled = 2,

    /// Invalid arguments
    ArgsError = 10,

    /// Config file missing, unreadable or invalid
    ConfigError = 11,

    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl From<&ErpError> for ExitCode {
    fn from(err: &ErpError) -> Self {
        match err {
            ErpError::QuiescenceTimeout { .. } => ExitCode::Unsettled,
            _ => match err.category() {
                ErrorCategory::Usage => ExitCode::ArgsError,
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Io => ExitCode::IoError,
                _ => ExitCode::InternalError,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_common::TargetRef;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Clean.as_i32(), 0);
        assert_eq!(ExitCode::Unsettled.as_i32(), 2);
        assert_eq!(ExitCode::ConfigError.as_i32(), 11);
        assert!(ExitCode::Clean.is_success());
        assert!(!ExitCode::TargetsFailed.is_success());
    }

    #[test]
    fn test_from_error() {
        assert_eq!(
            ExitCode::from(&ErpError::QuiescenceTimeout { millis: 5 }),
            ExitCode::Unsettled
        );
        assert_eq!(
            ExitCode::from(&ErpError::NoSuchTarget(TargetRef::Adapter)),
            ExitCode::ArgsError
        );
        assert_eq!(
            ExitCode::from(&ErpError::Config("bad".into())),
            ExitCode::ConfigError
        );
    }
}
