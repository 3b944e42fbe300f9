//! Recovery action records and per-strategy step enums.

use std::time::Instant;

use erp_common::{ActionFlags, ActionKind, RequestId, TargetRef};
use serde::{Deserialize, Serialize};

/// Progress of an adapter recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum AdapterStep {
    Uninitialized,
    /// Exchange config submitted; `attempt` counts from 1.
    ExchangeConfig { attempt: u32 },
    /// Host connection still initializing; backing off before `attempt`.
    ExchangeConfigBackoff { attempt: u32 },
    /// Open phase failed; pausing before the failure is reported.
    FailedDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortForcedStep {
    Uninitialized,
    PhysClosing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStep {
    Uninitialized,
    Closing,
    /// Waiting for the nameserver port's own recovery.
    NameserverOpen,
    NameserverLookup,
    /// Open at the resolved address (remote ports) or the well-known
    /// address (nameserver).
    Opening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStep {
    Uninitialized,
    Closing,
    Opening,
}

/// Where an action stands inside its strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy", content = "at")]
pub enum Step {
    Adapter(AdapterStep),
    PortForced(PortForcedStep),
    Port(PortStep),
    Unit(UnitStep),
}

impl Step {
    pub fn initial(kind: ActionKind) -> Self {
        match kind {
            ActionKind::ReopenAdapter => Step::Adapter(AdapterStep::Uninitialized),
            ActionKind::ReopenPortForced => Step::PortForced(PortForcedStep::Uninitialized),
            ActionKind::ReopenPort => Step::Port(PortStep::Uninitialized),
            ActionKind::ReopenUnit => Step::Unit(UnitStep::Uninitialized),
        }
    }
}

/// What a strategy pass reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyResult {
    /// Suspended until a completion, timeout, dismissal or delay resumes it.
    Continues,
    Succeeded,
    Failed,
    /// Could not allocate request resources; retried after a memory wait.
    NoMem,
    /// Superseded by a stronger action; discarded without follow-up.
    Dismissed,
    /// Finished without follow-up (close-only, structural failure,
    /// permanently failed target, or a statechange re-enqueue).
    Exit,
}

impl std::fmt::Display for StrategyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyResult::Continues => "continues",
            StrategyResult::Succeeded => "succeeded",
            StrategyResult::Failed => "failed",
            StrategyResult::NoMem => "nomem",
            StrategyResult::Dismissed => "dismissed",
            StrategyResult::Exit => "exit",
        };
        write!(f, "{}", s)
    }
}

/// Why a suspended action was put back on the ready list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    #[default]
    None,
    Dismissed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Guards an outstanding hardware request.
    Request,
    /// Plain delay (backoff, memory wait, failed delay).
    Delay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub deadline: Instant,
    pub kind: TimerKind,
}

/// Request this action is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingRequest {
    pub id: RequestId,
    pub low_memory: bool,
}

/// One queued or in-flight recovery. Lives in its target's action slot;
/// queues refer to it by target.
#[derive(Debug, Clone)]
pub struct ErpAction {
    pub kind: ActionKind,
    pub target: TargetRef,
    pub flags: ActionFlags,
    pub step: Step,
    pub request: Option<OutstandingRequest>,
    pub timer: Option<Timer>,
    pub wake: WakeReason,
}

impl ErpAction {
    pub fn new(kind: ActionKind, target: TargetRef, flags: ActionFlags) -> Self {
        Self {
            kind,
            target,
            flags,
            step: Step::initial(kind),
            request: None,
            timer: None,
            wake: WakeReason::None,
        }
    }

    pub fn is_close_only(&self) -> bool {
        self.flags.contains(ActionFlags::CLOSE_ONLY)
    }

    pub fn is_dismissed(&self) -> bool {
        self.flags.contains(ActionFlags::DISMISSED)
    }

    pub fn is_timed_out(&self) -> bool {
        self.flags.contains(ActionFlags::TIMED_OUT)
    }

    pub fn is_low_memory(&self) -> bool {
        self.flags.contains(ActionFlags::LOWMEM)
    }
}

/// Serializable view of an action for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub kind: ActionKind,
    pub target: TargetRef,
    pub flags: ActionFlags,
    pub step: Step,
    pub request: Option<OutstandingRequest>,
    pub wake: WakeReason,
    pub timer_armed: bool,
}

impl From<&ErpAction> for ActionSnapshot {
    fn from(action: &ErpAction) -> Self {
        Self {
            kind: action.kind,
            target: action.target,
            flags: action.flags,
            step: action.step,
            request: action.request,
            wake: action.wake,
            timer_armed: action.timer.is_some(),
        }
    }
}
