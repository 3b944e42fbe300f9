//! Logging for the recovery engine.
//!
//! Everything goes to stderr, either as console lines or as JSONL; stdout
//! belongs to the simulator's report. Engine events carry the run id and
//! adapter name so output from several engines can be told apart.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, LogEvent, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. A subscriber installed earlier (a test
/// harness, an embedding application) is left in place.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Human => {
            let console = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                registry.with(console).try_init()
            } else {
                registry.with(console.without_time()).try_init()
            }
        }
        LogFormat::Jsonl => registry.with(JsonlLayer::stderr()).try_init(),
    };
    let _ = result;
}

/// Generate a unique run ID for one engine instance.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    format!("run-{}", &uuid.simple().to_string()[..12])
}

/// Structured event logging with engine context.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::ERP_ENQUEUED, Stage::Enqueue, "recovery queued",
///     target_id = %target, action = %kind);
/// ```
#[macro_export]
macro_rules! log_event {
    (@emit $level:ident, $ctx:expr, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        tracing::$level!(
            target: $event,
            run_id = %$ctx.run_id,
            adapter = %$ctx.adapter,
            stage = %$stage,
            $($($fields)+,)?
            message = $msg,
        )
    };
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        $crate::log_event!(@emit info, $ctx, $event, $stage, $msg $(, $($fields)+)?)
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        $crate::log_event!(@emit debug, $ctx, $event, $stage, $msg $(, $($fields)+)?)
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        $crate::log_event!(@emit warn, $ctx, $event, $stage, $msg $(, $($fields)+)?)
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        $crate::log_event!(@emit error, $ctx, $event, $stage, $msg $(, $($fields)+)?)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let config = LogConfig::default().with_level(LogLevel::Off);
        init_logging(&config);
        init_logging(&config.with_format(LogFormat::Jsonl));
    }

    #[test]
    fn test_log_event_macro_compiles_with_fields() {
        let ctx = LogContext::new("run-test", "adapter0");
        let target = "port#1";
        log_event!(ctx, INFO, event_names::ERP_ENQUEUED, Stage::Enqueue, "queued");
        log_event!(
            ctx,
            DEBUG,
            event_names::ERP_SUBMITTED,
            Stage::Strategy,
            "submitted",
            target_id = %target,
            request = 7u64
        );
    }
}
