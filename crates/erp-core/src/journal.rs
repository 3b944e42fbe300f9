//! Capped in-memory record of every recovery decision.
//!
//! Each entry is also emitted as a `tracing` event under its stable event
//! name, so the journal and the log stream never disagree.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use erp_common::{ActionKind, RequestId, TargetRef};
use serde::{Deserialize, Serialize};

use crate::action::StrategyResult;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::request::RequestKind;
use crate::services::RequestOutcome;

/// Why a recovery request was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Caller of the public API.
    External,
    /// Follow-up of a finished action.
    FollowUp,
    /// Target state changed while its action ran.
    Statechange,
    /// A port needed the nameserver opened first.
    Nameserver,
    /// Resource exhaustion across all actions, or a timed-out request from
    /// the low-memory pool.
    LowMemory,
}

/// Why the policy refused to queue anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The target already has an action.
    InUse,
    /// The target is marked permanently failed.
    TargetFailed,
    /// The adapter itself is neither running nor open.
    TargetNotRunning,
    /// The parent target is shut down.
    ParentNotRunning,
    /// The parent target is marked permanently failed.
    ParentFailed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::InUse => "in_use",
            DropReason::TargetFailed => "target_failed",
            DropReason::TargetNotRunning => "target_not_running",
            DropReason::ParentNotRunning => "parent_not_running",
            DropReason::ParentFailed => "parent_failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ErpEventKind {
    WorkerStarted,
    WorkerStopped,
    Enqueued {
        kind: ActionKind,
        target: TargetRef,
        cause: Cause,
    },
    Escalated {
        from: ActionKind,
        from_target: TargetRef,
        to: ActionKind,
        to_target: TargetRef,
    },
    Dropped {
        kind: ActionKind,
        target: TargetRef,
        reason: DropReason,
    },
    Dismissed {
        kind: ActionKind,
        target: TargetRef,
    },
    Submitted {
        target: TargetRef,
        request: RequestId,
        request_kind: RequestKind,
    },
    LowMemory {
        target: TargetRef,
    },
    Completed {
        request: RequestId,
        request_kind: RequestKind,
        outcome: RequestOutcome,
    },
    TimedOut {
        target: TargetRef,
        request: Option<RequestId>,
    },
    Finished {
        kind: ActionKind,
        target: TargetRef,
        result: StrategyResult,
        retries: u32,
    },
    Dequeued {
        kind: ActionKind,
        target: TargetRef,
    },
    Statechange {
        kind: ActionKind,
        target: TargetRef,
    },
    TargetFailed {
        target: TargetRef,
        retries: u32,
    },
    Quiesced,
}

impl ErpEventKind {
    /// Target the event is about, if any.
    pub fn target(&self) -> Option<TargetRef> {
        match self {
            ErpEventKind::Enqueued { target, .. }
            | ErpEventKind::Dropped { target, .. }
            | ErpEventKind::Dismissed { target, .. }
            | ErpEventKind::Submitted { target, .. }
            | ErpEventKind::LowMemory { target }
            | ErpEventKind::TimedOut { target, .. }
            | ErpEventKind::Finished { target, .. }
            | ErpEventKind::Dequeued { target, .. }
            | ErpEventKind::Statechange { target, .. }
            | ErpEventKind::TargetFailed { target, .. } => Some(*target),
            ErpEventKind::Escalated { to_target, .. } => Some(*to_target),
            ErpEventKind::Completed { request_kind, .. } => Some(request_kind.target()),
            ErpEventKind::WorkerStarted | ErpEventKind::WorkerStopped | ErpEventKind::Quiesced => {
                None
            }
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpEvent {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ErpEventKind,
}

#[derive(Debug)]
pub struct Journal {
    ctx: LogContext,
    capacity: usize,
    next_seq: u64,
    events: VecDeque<ErpEvent>,
}

impl Journal {
    pub fn new(ctx: LogContext, capacity: usize) -> Self {
        Journal {
            ctx,
            capacity,
            next_seq: 0,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn context(&self) -> &LogContext {
        &self.ctx
    }

    /// Append an event, evicting the oldest once full, and log it.
    pub fn record(&mut self, kind: ErpEventKind) {
        self.emit(&kind);
        self.next_seq += 1;
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(ErpEvent {
            seq: self.next_seq,
            ts: Utc::now(),
            kind,
        });
    }

    pub fn events(&self) -> Vec<ErpEvent> {
        self.events.iter().cloned().collect()
    }

    /// Total events recorded, including evicted ones.
    pub fn recorded(&self) -> u64 {
        self.next_seq
    }

    fn emit(&self, kind: &ErpEventKind) {
        let ctx = &self.ctx;
        match kind {
            ErpEventKind::WorkerStarted => {
                log_event!(ctx, INFO, event_names::WORKER_STARTED, Stage::Lifecycle, "worker started")
            }
            ErpEventKind::WorkerStopped => {
                log_event!(ctx, INFO, event_names::WORKER_STOPPED, Stage::Lifecycle, "worker stopped")
            }
            ErpEventKind::Enqueued {
                kind,
                target,
                cause,
            } => log_event!(
                ctx,
                INFO,
                event_names::ERP_ENQUEUED,
                Stage::Enqueue,
                "recovery queued",
                action = %kind,
                target_id = %target,
                cause = ?cause
            ),
            ErpEventKind::Escalated {
                from,
                from_target,
                to,
                to_target,
            } => log_event!(
                ctx,
                INFO,
                event_names::ERP_ESCALATED,
                Stage::Enqueue,
                "recovery escalated to parent",
                from = %from,
                from_target = %from_target,
                action = %to,
                target_id = %to_target
            ),
            ErpEventKind::Dropped {
                kind,
                target,
                reason,
            } => log_event!(
                ctx,
                DEBUG,
                event_names::ERP_DROPPED,
                Stage::Enqueue,
                "recovery not needed",
                action = %kind,
                target_id = %target,
                reason = %reason
            ),
            ErpEventKind::Dismissed { kind, target } => log_event!(
                ctx,
                INFO,
                event_names::ERP_DISMISSED,
                Stage::Completion,
                "action dismissed",
                action = %kind,
                target_id = %target
            ),
            ErpEventKind::Submitted {
                target,
                request,
                request_kind,
            } => log_event!(
                ctx,
                DEBUG,
                event_names::ERP_SUBMITTED,
                Stage::Strategy,
                "request submitted",
                target_id = %target,
                request = %request,
                request_kind = request_kind.name()
            ),
            ErpEventKind::LowMemory { target } => log_event!(
                ctx,
                WARN,
                event_names::ERP_LOWMEM,
                Stage::Strategy,
                "out of request memory",
                target_id = %target
            ),
            ErpEventKind::Completed {
                request,
                request_kind,
                outcome,
            } => log_event!(
                ctx,
                DEBUG,
                event_names::ERP_COMPLETED,
                Stage::Completion,
                "request completed",
                request = %request,
                request_kind = request_kind.name(),
                outcome = ?outcome
            ),
            ErpEventKind::TimedOut { target, request } => log_event!(
                ctx,
                WARN,
                event_names::ERP_TIMEOUT,
                Stage::Completion,
                "request timed out",
                target_id = %target,
                request = ?request
            ),
            ErpEventKind::Finished {
                kind,
                target,
                result,
                retries,
            } => log_event!(
                ctx,
                INFO,
                event_names::ERP_FINISHED,
                Stage::Followup,
                "action finished",
                action = %kind,
                target_id = %target,
                result = %result,
                retries = *retries
            ),
            ErpEventKind::Dequeued { kind, target } => log_event!(
                ctx,
                DEBUG,
                event_names::ERP_DEQUEUED,
                Stage::Followup,
                "action dequeued",
                action = %kind,
                target_id = %target
            ),
            ErpEventKind::Statechange { kind, target } => log_event!(
                ctx,
                INFO,
                event_names::ERP_STATECHANGE,
                Stage::Followup,
                "target state changed during recovery",
                action = %kind,
                target_id = %target
            ),
            ErpEventKind::TargetFailed { target, retries } => log_event!(
                ctx,
                WARN,
                event_names::ERP_TARGET_FAILED,
                Stage::Followup,
                "target marked failed",
                target_id = %target,
                retries = *retries
            ),
            ErpEventKind::Quiesced => {
                log_event!(ctx, DEBUG, event_names::ERP_QUIESCED, Stage::Followup, "recovery quiesced")
            }
        }
    }
}
