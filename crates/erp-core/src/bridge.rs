//! Asynchronous completion bridge.
//!
//! Hardware completions, request timeouts and plain delays all end in the
//! same funnel: the action that waited is put back at the head of the
//! ready list if it is still suspended, otherwise nothing happens.

use std::time::Instant;

use erp_common::{AdapterStatus, ActionFlags, PortStatus, RequestId, TargetRef, UnitStatus};

use crate::action::{TimerKind, WakeReason};
use crate::blocking::StatusOp;
use crate::hierarchy::Hierarchy;
use crate::journal::{Cause, ErpEventKind};
use crate::policy;
use crate::request::RequestKind;
use crate::services::RequestOutcome;
use crate::state::{EngineState, Shared};

const OPEN: u32 = UnitStatus::OPEN.bits();
const TRANSIENT: u32 = UnitStatus::OPENING.bits() | UnitStatus::CLOSING.bits();

impl Shared {
    /// Entry point behind [`crate::services::CompletionHandle`].
    pub(crate) fn complete_request(&self, id: RequestId, outcome: RequestOutcome) -> bool {
        let accepted = {
            let mut st = self.lock();
            complete(&mut st, id, outcome)
        };
        if accepted {
            self.wake.notify_all();
        }
        accepted
    }
}

/// Apply a completion and resume its owner. Returns false for requests the
/// engine no longer knows (late, dismissed or timed out).
pub(crate) fn complete(st: &mut EngineState, id: RequestId, outcome: RequestOutcome) -> bool {
    let Some(record) = st.requests.take(id) else {
        return false;
    };
    apply_outcome(&mut st.hierarchy, record.kind, outcome);
    st.record(ErpEventKind::Completed {
        request: id,
        request_kind: record.kind,
        outcome,
    });

    if let Some(owner) = record.owner {
        if let Some(action) = st.hierarchy.action_mut(owner) {
            if action.request.map(|r| r.id) == Some(id) {
                action.request = None;
                action.timer = None;
                action.wake = WakeReason::None;
            }
        }
        st.queue.resume(owner);
    }
    true
}

/// Reflect what the hardware-request layer reported in target status.
pub(crate) fn apply_outcome(h: &mut Hierarchy, kind: RequestKind, outcome: RequestOutcome) {
    let target = kind.target();
    h.set_target_status(target, TRANSIENT, StatusOp::Clear);
    let ok = outcome == RequestOutcome::Success;

    match kind {
        RequestKind::ExchangeConfig => {
            let status = &mut h.adapter.status;
            match outcome {
                RequestOutcome::Success => {
                    status.insert(AdapterStatus::XCONFIG_OK);
                    status.remove(AdapterStatus::HOST_CON_INIT);
                }
                RequestOutcome::HostConnectionInitializing => {
                    status.insert(AdapterStatus::HOST_CON_INIT);
                }
                _ => {}
            }
        }
        RequestKind::StatusRead => {}
        RequestKind::OpenPort { .. } if ok => {
            h.set_target_status(
                target,
                (PortStatus::OPEN | PortStatus::PHYS_OPEN).bits(),
                StatusOp::Set,
            );
        }
        RequestKind::ClosePort { .. } if ok => {
            h.modify_status(target, OPEN, StatusOp::Clear);
        }
        RequestKind::ClosePhysicalPort { .. } if ok => {
            h.set_target_status(target, PortStatus::PHYS_OPEN.bits(), StatusOp::Clear);
            h.modify_status(target, OPEN, StatusOp::Clear);
        }
        RequestKind::OpenUnit { .. } if ok => h.set_target_status(target, OPEN, StatusOp::Set),
        RequestKind::CloseUnit { .. } if ok => h.set_target_status(target, OPEN, StatusOp::Clear),
        RequestKind::NameserverLookup { port } => {
            if let Some(p) = h.port_mut(port) {
                match outcome {
                    RequestOutcome::Resolved { d_id } => {
                        p.d_id = d_id;
                        p.status.insert(PortStatus::DID_VALID);
                        p.status.remove(PortStatus::WWPN_INVALID);
                    }
                    RequestOutcome::InvalidWwpn => {
                        p.status.remove(PortStatus::DID_VALID);
                        p.status.insert(PortStatus::WWPN_INVALID);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Fire every expired timer of a suspended action. Returns the number fired.
pub(crate) fn fire_timers(st: &mut EngineState, now: Instant) -> usize {
    let expired: Vec<TargetRef> = st
        .queue
        .running()
        .copied()
        .filter(|t| {
            st.hierarchy
                .action(*t)
                .and_then(|a| a.timer)
                .is_some_and(|timer| timer.deadline <= now)
        })
        .collect();

    for target in &expired {
        let Some(action) = st.hierarchy.action_mut(*target) else {
            continue;
        };
        let Some(timer) = action.timer.take() else {
            continue;
        };
        match timer.kind {
            TimerKind::Delay => {
                action.wake = WakeReason::None;
                st.queue.resume(*target);
            }
            TimerKind::Request => timed_out(st, *target),
        }
    }
    expired.len()
}

/// The request an action waited on did not complete in time.
fn timed_out(st: &mut EngineState, target: TargetRef) {
    let request = st.hierarchy.action_mut(target).and_then(|action| {
        action.flags.insert(ActionFlags::TIMED_OUT);
        action.wake = WakeReason::TimedOut;
        action.request.take()
    });

    let mut low_memory = false;
    if let Some(req) = request {
        if let Some(record) = st.requests.take(req.id) {
            st.hierarchy
                .set_target_status(record.kind.target(), TRANSIENT, StatusOp::Clear);
            st.pending_dismissals.push(req.id);
            low_memory = record.low_memory || req.low_memory;
        }
    }
    st.record(ErpEventKind::TimedOut {
        target,
        request: request.map(|r| r.id),
    });
    st.queue.resume(target);

    if low_memory {
        // the buffer only comes back with an adapter reset
        let _ = policy::reopen(st, TargetRef::Adapter, 0, Cause::LowMemory);
    }
}
