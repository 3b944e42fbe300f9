//! Escalation and enqueue policy.
//!
//! Decides whether a recovery request is dropped, escalated to a stronger
//! action on an ancestor, or queued as asked. Everything here runs under
//! the engine lock and never calls out to the fabric.

use erp_common::{ActionFlags, ActionKind, AdapterStatus, ErpError, Result, TargetRef, UnitStatus};
use serde::{Deserialize, Serialize};

use crate::action::{ErpAction, WakeReason};
use crate::blocking::StatusOp;
use crate::journal::{Cause, DropReason, ErpEventKind};
use crate::state::EngineState;

/// Result of a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EnqueueOutcome {
    /// An action of `kind` now exists for `target`; both may differ from
    /// the request after escalation.
    Queued { kind: ActionKind, target: TargetRef },
    Dropped { reason: DropReason },
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued { .. })
    }

    pub fn dropped(reason: DropReason) -> Self {
        EnqueueOutcome::Dropped { reason }
    }
}

const COMMON_RUNNING: u32 = UnitStatus::RUNNING.bits();
const COMMON_UNBLOCKED: u32 = UnitStatus::UNBLOCKED.bits();
const COMMON_OPEN: u32 = UnitStatus::OPEN.bits();
const COMMON_FAILED: u32 = UnitStatus::ERP_FAILED.bits();
const COMMON_INUSE: u32 = UnitStatus::ERP_INUSE.bits();

/// Request recovery of `kind` on `target`.
///
/// Fails only for bad input (unknown target, kind not applicable to the
/// target) or when the worker is down; every policy decision is an
/// [`EnqueueOutcome`].
pub fn enqueue(
    st: &mut EngineState,
    kind: ActionKind,
    target: TargetRef,
    cause: Cause,
) -> Result<EnqueueOutcome> {
    st.hierarchy.require(target)?;
    let target = kind
        .target_for(target)
        .ok_or(ErpError::InvalidAction(target))?;

    if handle_failed(st, target) {
        return Ok(drop_request(st, kind, target, DropReason::TargetFailed));
    }
    if !st.worker_up() {
        return Err(ErpError::WorkerNotRunning);
    }

    let (need, need_target) = match required_action(st, kind, target) {
        Ok(need) => need,
        Err(reason) => return Ok(drop_request(st, kind, target, reason)),
    };
    if need != kind || need_target != target {
        st.record(ErpEventKind::Escalated {
            from: kind,
            from_target: target,
            to: need,
            to_target: need_target,
        });
    }

    setup_action(st, need, need_target, cause);
    Ok(EnqueueOutcome::Queued {
        kind: need,
        target: need_target,
    })
}

/// Block `target`, clearing `clear_mask` with `UNBLOCKED`, and queue its
/// natural recovery.
pub fn reopen(
    st: &mut EngineState,
    target: TargetRef,
    clear_mask: u32,
    cause: Cause,
) -> Result<EnqueueOutcome> {
    reopen_as(st, ActionKind::for_target(target), target, clear_mask, cause)
}

/// Like [`reopen`] with an explicit kind, for forced port reopens.
pub fn reopen_as(
    st: &mut EngineState,
    kind: ActionKind,
    target: TargetRef,
    clear_mask: u32,
    cause: Cause,
) -> Result<EnqueueOutcome> {
    st.hierarchy.require(target)?;
    let scope = kind
        .target_for(target)
        .ok_or(ErpError::InvalidAction(target))?;
    st.hierarchy.block(scope, clear_mask);
    enqueue(st, kind, scope, cause)
}

/// Take `target` out of service: a reopen that clears `RUNNING`, so the
/// resulting action only closes.
pub fn shutdown(
    st: &mut EngineState,
    target: TargetRef,
    clear_mask: u32,
    cause: Cause,
) -> Result<EnqueueOutcome> {
    reopen(st, target, COMMON_RUNNING | COMMON_FAILED | clear_mask, cause)
}

fn drop_request(
    st: &mut EngineState,
    kind: ActionKind,
    target: TargetRef,
    reason: DropReason,
) -> EnqueueOutcome {
    st.record(ErpEventKind::Dropped {
        kind,
        target,
        reason,
    });
    EnqueueOutcome::dropped(reason)
}

/// A target already marked failed stays blocked and gets no action.
fn handle_failed(st: &mut EngineState, target: TargetRef) -> bool {
    if st.hierarchy.has(target, COMMON_FAILED) {
        st.hierarchy.block(target, 0);
        return true;
    }
    false
}

/// Walk the escalation rules from the requested kind upwards.
fn required_action(
    st: &EngineState,
    kind: ActionKind,
    target: TargetRef,
) -> std::result::Result<(ActionKind, TargetRef), DropReason> {
    let h = &st.hierarchy;
    let mut need = kind;
    let mut need_target = target;

    if kind == ActionKind::ReopenUnit {
        let port = port_of(target);
        let p_status = h.status_bits(port);
        // a busy unit under a blocked port still escalates to the port
        if h.has(target, COMMON_INUSE) && p_status & COMMON_UNBLOCKED != 0 {
            return Err(DropReason::InUse);
        }
        if p_status & COMMON_RUNNING == 0 {
            return Err(DropReason::ParentNotRunning);
        }
        if p_status & COMMON_FAILED != 0 {
            return Err(DropReason::ParentFailed);
        }
        if p_status & COMMON_UNBLOCKED == 0 {
            need = ActionKind::ReopenPort;
            need_target = port;
        }
    }

    if need == ActionKind::ReopenPortForced && !h.has(need_target, COMMON_OPEN) {
        // nothing to close physically
        need = ActionKind::ReopenPort;
    }

    if matches!(need, ActionKind::ReopenPort | ActionKind::ReopenPortForced) {
        if h.has(need_target, COMMON_INUSE) {
            return Err(DropReason::InUse);
        }
        let a_status = h.adapter.status;
        if !a_status.contains(AdapterStatus::RUNNING) {
            return Err(DropReason::ParentNotRunning);
        }
        if a_status.contains(AdapterStatus::ERP_FAILED) {
            return Err(DropReason::ParentFailed);
        }
        if !a_status.contains(AdapterStatus::UNBLOCKED) {
            need = ActionKind::ReopenAdapter;
            need_target = TargetRef::Adapter;
        }
    }

    if need == ActionKind::ReopenAdapter {
        let a_status = h.adapter.status;
        if a_status.contains(AdapterStatus::ERP_INUSE) {
            return Err(DropReason::InUse);
        }
        // shutting down an adapter that is already closed
        if !a_status.intersects(AdapterStatus::RUNNING | AdapterStatus::OPEN) {
            return Err(DropReason::TargetNotRunning);
        }
    }

    Ok((need, need_target))
}

fn port_of(target: TargetRef) -> TargetRef {
    target
        .port_id()
        .map(TargetRef::port)
        .unwrap_or(TargetRef::Adapter)
}

/// Build the action, dismiss what it supersedes and queue it.
fn setup_action(st: &mut EngineState, kind: ActionKind, target: TargetRef, cause: Cause) {
    match target {
        TargetRef::Adapter => dismiss_adapter_descendants(st),
        TargetRef::Port { .. } => dismiss_port_descendants(st, target),
        TargetRef::Unit { .. } => {}
    }

    let running = st.hierarchy.has(target, COMMON_RUNNING);
    let flags = if running {
        ActionFlags::empty()
    } else {
        ActionFlags::CLOSE_ONLY
    };
    st.hierarchy.set_target_status(target, COMMON_INUSE, StatusOp::Set);
    if let Some(slot) = st.hierarchy.slot_mut(target) {
        slot.refs += 1;
        slot.action = Some(ErpAction::new(kind, target, flags));
    }

    st.queue.enqueue(target);
    st.hierarchy.adapter.status.insert(AdapterStatus::ERP_PENDING);
    st.counters.total += 1;
    st.record(ErpEventKind::Enqueued {
        kind,
        target,
        cause,
    });
}

fn dismiss_adapter_descendants(st: &mut EngineState) {
    for port in st.hierarchy.port_ids() {
        dismiss_port_descendants(st, TargetRef::port(port));
    }
}

/// Dismiss the port's action if it has one, otherwise its units' actions.
fn dismiss_port_descendants(st: &mut EngineState, port: TargetRef) {
    if st.hierarchy.has(port, COMMON_INUSE) {
        dismiss(st, port);
        return;
    }
    let Some(port_id) = port.port_id() else {
        return;
    };
    for unit in st.hierarchy.unit_ids(port_id) {
        let target = TargetRef::unit(port_id, unit);
        if st.hierarchy.has(target, COMMON_INUSE) {
            dismiss(st, target);
        }
    }
}

/// Mark the action on `target` superseded.
///
/// A suspended action is put back on the ready list so the worker discards
/// it on its next pass. Its outstanding request is forgotten at once and
/// queued for dismissal at the fabric layer.
pub fn dismiss(st: &mut EngineState, target: TargetRef) {
    let Some(action) = st.hierarchy.action_mut(target) else {
        return;
    };
    if action.is_dismissed() {
        return;
    }
    action.flags.insert(ActionFlags::DISMISSED);
    action.wake = WakeReason::Dismissed;
    action.timer = None;
    let kind = action.kind;
    let request = action.request.take();

    if let Some(request) = request {
        if st.requests.take(request.id).is_some() {
            st.pending_dismissals.push(request.id);
        }
    }
    st.queue.resume(target);
    st.record(ErpEventKind::Dismissed { kind, target });
}

/// Mark `target` permanently failed, along with the common status of its
/// descendants.
pub fn mark_failed(st: &mut EngineState, target: TargetRef) {
    st.hierarchy.modify_status(target, COMMON_FAILED, StatusOp::Set);
}
