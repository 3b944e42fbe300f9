//! Event vocabulary for the recovery engine.
//!
//! Every event name belongs to exactly one pipeline [`Stage`]; the stage is
//! derived from the name so call sites cannot disagree about it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use erp_common::TargetRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            Level::Error
        } else if level == tracing::Level::WARN {
            Level::Warn
        } else if level == tracing::Level::INFO {
            Level::Info
        } else if level == tracing::Level::DEBUG {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

/// Where in the recovery pipeline an event originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Worker start and stop, configuration, simulator runs.
    Lifecycle,
    /// Escalation and queueing decisions.
    Enqueue,
    /// Strategy steps and submitted requests.
    Strategy,
    /// Request completions, timeouts and dismissals.
    Completion,
    /// Target checks, status changes and follow-up.
    Followup,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lifecycle => "lifecycle",
            Stage::Enqueue => "enqueue",
            Stage::Strategy => "strategy",
            Stage::Completion => "completion",
            Stage::Followup => "followup",
        }
    }

    /// Stage an event name belongs to; unknown names count as lifecycle.
    pub fn of(event: &str) -> Stage {
        event_names::ALL
            .iter()
            .find(|(name, _)| *name == event)
            .map_or(Stage::Lifecycle, |(_, stage)| *stage)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod event_names {
    use super::Stage;

    pub const WORKER_STARTED: &str = "worker.started";
    pub const WORKER_STOPPED: &str = "worker.stopped";
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const SIM_FINISHED: &str = "sim.finished";

    pub const ERP_ENQUEUED: &str = "erp.enqueued";
    pub const ERP_ESCALATED: &str = "erp.escalated";
    pub const ERP_DROPPED: &str = "erp.dropped";

    pub const ERP_SUBMITTED: &str = "erp.submitted";
    pub const ERP_LOWMEM: &str = "erp.lowmem";

    pub const ERP_COMPLETED: &str = "erp.completed";
    pub const ERP_TIMEOUT: &str = "erp.timeout";
    pub const ERP_DISMISSED: &str = "erp.dismissed";

    pub const ERP_FINISHED: &str = "erp.finished";
    pub const ERP_DEQUEUED: &str = "erp.dequeued";
    pub const ERP_STATECHANGE: &str = "erp.statechange";
    pub const ERP_TARGET_FAILED: &str = "erp.target_failed";
    pub const ERP_QUIESCED: &str = "erp.quiesced";

    pub(super) const ALL: &[(&str, Stage)] = &[
        (WORKER_STARTED, Stage::Lifecycle),
        (WORKER_STOPPED, Stage::Lifecycle),
        (CONFIG_LOADED, Stage::Lifecycle),
        (CONFIG_DEFAULT_USED, Stage::Lifecycle),
        (SIM_FINISHED, Stage::Lifecycle),
        (ERP_ENQUEUED, Stage::Enqueue),
        (ERP_ESCALATED, Stage::Enqueue),
        (ERP_DROPPED, Stage::Enqueue),
        (ERP_SUBMITTED, Stage::Strategy),
        (ERP_LOWMEM, Stage::Strategy),
        (ERP_COMPLETED, Stage::Completion),
        (ERP_TIMEOUT, Stage::Completion),
        (ERP_DISMISSED, Stage::Completion),
        (ERP_FINISHED, Stage::Followup),
        (ERP_DEQUEUED, Stage::Followup),
        (ERP_STATECHANGE, Stage::Followup),
        (ERP_TARGET_FAILED, Stage::Followup),
        (ERP_QUIESCED, Stage::Followup),
    ];
}

/// A log line built outside `tracing`, with the same shape the JSONL
/// layer writes. The simulator uses it for its end-of-run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: Level,
    pub event: String,
    pub run_id: String,
    pub adapter: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEvent {
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    pub fn about(mut self, target: TargetRef) -> Self {
        self.target_id = Some(target.to_string());
        self
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "event": self.event, "error": e.to_string() }).to_string()
        })
    }
}

/// Correlation ids shared by every event one engine emits.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub adapter: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, adapter: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            adapter: adapter.into(),
        }
    }

    pub fn event(&self, level: Level, name: &str, message: impl Into<String>) -> LogEvent {
        LogEvent {
            ts: Utc::now(),
            level,
            event: name.to_string(),
            run_id: self.run_id.clone(),
            adapter: self.adapter.clone(),
            stage: Stage::of(name),
            target_id: None,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn info(&self, name: &str, message: impl Into<String>) -> LogEvent {
        self.event(Level::Info, name, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_common::PortId;

    #[test]
    fn test_stage_follows_event_name() {
        assert_eq!(Stage::of(event_names::ERP_DROPPED), Stage::Enqueue);
        assert_eq!(Stage::of(event_names::ERP_DISMISSED), Stage::Completion);
        assert_eq!(Stage::of(event_names::ERP_QUIESCED), Stage::Followup);
        assert_eq!(Stage::of("something.else"), Stage::Lifecycle);
    }

    #[test]
    fn test_every_event_name_is_staged_once() {
        let mut names: Vec<&str> = event_names::ALL.iter().map(|(n, _)| *n).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_summary_line_shape() {
        let ctx = LogContext::new("run-12345", "adapter0");
        let line = ctx
            .info(event_names::SIM_FINISHED, "simulation finished")
            .about(TargetRef::port(PortId(1)))
            .with_field("settled", true)
            .with_field("requests", 14u64)
            .to_jsonl();

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "sim.finished");
        assert_eq!(parsed["stage"], "lifecycle");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["target_id"], TargetRef::port(PortId(1)).to_string());
        assert_eq!(parsed["fields"]["requests"], 14);
    }

    #[test]
    fn test_stage_display_matches_serde() {
        for (_, stage) in event_names::ALL {
            let json = serde_json::to_string(stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
        }
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Trace);
        assert!(Level::Error > Level::Info);
    }
}
