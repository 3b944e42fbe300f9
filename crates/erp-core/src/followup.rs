//! What happens once a strategy reaches a terminal result: target check,
//! dequeue, statechange detection, follow-up recovery and quiescence.

use erp_common::{ActionFlags, ActionKind, AdapterStatus, TargetRef, UnitStatus};

use crate::action::{PortStep, Step, StrategyResult};
use crate::blocking::StatusOp;
use crate::journal::{Cause, ErpEventKind};
use crate::policy::{self, EnqueueOutcome};
use crate::state::EngineState;

const RUNNING: u32 = UnitStatus::RUNNING.bits();
const OPEN: u32 = UnitStatus::OPEN.bits();
const FAILED: u32 = UnitStatus::ERP_FAILED.bits();
const INUSE: u32 = UnitStatus::ERP_INUSE.bits();

/// Finish the action on `target` with `result` (succeeded, failed or exit).
pub(crate) fn finish(st: &mut EngineState, target: TargetRef, result: StrategyResult) {
    let Some(action) = st.hierarchy.action(target) else {
        return;
    };
    let kind = action.kind;
    let close_only = action.is_close_only();
    let was_nameserver = is_nameserver(st, target);

    let checked = check_target(st, target, result);
    let retries = st.hierarchy.slot(target).map_or(0, |s| s.retries);
    st.record(ErpEventKind::Finished {
        kind,
        target,
        result,
        retries,
    });
    dequeue(st, target);

    let checked = statechange(st, kind, target, close_only, checked);
    match checked {
        StrategyResult::Succeeded => followup_success(st, kind, target),
        StrategyResult::Failed => followup_failed(st, kind, target),
        _ => {}
    }

    if was_nameserver {
        wake_nameserver_waiters(st);
    }
}

/// Remove a dismissed action without any follow-up.
pub(crate) fn discard(st: &mut EngineState, target: TargetRef) {
    let Some(action) = st.hierarchy.action(target) else {
        return;
    };
    let kind = action.kind;
    let retries = st.hierarchy.slot(target).map_or(0, |s| s.retries);
    st.record(ErpEventKind::Finished {
        kind,
        target,
        result: StrategyResult::Dismissed,
        retries,
    });
    dequeue(st, target);
}

fn is_nameserver(st: &EngineState, target: TargetRef) -> bool {
    matches!(target, TargetRef::Port { port } if st.hierarchy.nameserver() == Some(port))
}

/// Retry accounting and unblocking for the finished target.
fn check_target(st: &mut EngineState, target: TargetRef, result: StrategyResult) -> StrategyResult {
    let max_retries = st.config.max_retries;
    match result {
        StrategyResult::Succeeded => {
            if let Some(slot) = st.hierarchy.slot_mut(target) {
                slot.retries = 0;
            }
            st.hierarchy.set_target_status(target, FAILED, StatusOp::Clear);
            st.hierarchy.unblock(target);
            if let TargetRef::Unit { port, unit } = target {
                if st.hierarchy.unit(port, unit).is_some_and(|u| u.device.is_none()) {
                    st.pending_registrations.push((port, unit));
                }
            }
        }
        StrategyResult::Failed => {
            let retries = st.hierarchy.slot_mut(target).map_or(0, |slot| {
                slot.retries += 1;
                slot.retries
            });
            if retries >= max_retries {
                policy::mark_failed(st, target);
                st.record(ErpEventKind::TargetFailed { target, retries });
            }
        }
        _ => {}
    }

    if st.hierarchy.has(target, FAILED) {
        st.hierarchy.block(target, 0);
        return StrategyResult::Exit;
    }
    result
}

/// Release everything the action held on its target.
fn dequeue(st: &mut EngineState, target: TargetRef) {
    st.queue.remove(target);
    let mut low_memory = false;
    let mut kind = None;
    if let Some(slot) = st.hierarchy.slot_mut(target) {
        if let Some(action) = slot.action.take() {
            low_memory = action.flags.contains(ActionFlags::LOWMEM);
            kind = Some(action.kind);
        }
        slot.refs = slot.refs.saturating_sub(1);
    }
    let Some(kind) = kind else {
        return;
    };
    st.hierarchy.set_target_status(target, INUSE, StatusOp::Clear);
    st.counters.total = st.counters.total.saturating_sub(1);
    if low_memory {
        st.counters.low_mem = st.counters.low_mem.saturating_sub(1);
    }
    st.record(ErpEventKind::Dequeued { kind, target });
}

/// Re-queue when the target was switched on or off while its action ran.
fn statechange(
    st: &mut EngineState,
    kind: ActionKind,
    target: TargetRef,
    close_only: bool,
    result: StrategyResult,
) -> StrategyResult {
    if !st.hierarchy.contains(target) {
        return result;
    }
    let running = st.hierarchy.has(target, RUNNING);
    if running != close_only {
        return result;
    }
    st.record(ErpEventKind::Statechange { kind, target });
    let kind = match kind {
        ActionKind::ReopenPortForced => ActionKind::ReopenPort,
        other => other,
    };
    let _ = policy::reopen_as(st, kind, target, FAILED, Cause::Statechange);
    StrategyResult::Exit
}

fn followup_success(st: &mut EngineState, kind: ActionKind, target: TargetRef) {
    match kind {
        ActionKind::ReopenAdapter => {
            let ports: Vec<TargetRef> = st
                .hierarchy
                .ports()
                .filter(|p| !p.is_nameserver())
                .map(|p| TargetRef::port(p.id))
                .collect();
            for port in ports {
                let _ = policy::reopen(st, port, 0, Cause::FollowUp);
            }
        }
        ActionKind::ReopenPortForced => {
            let _ = policy::reopen(st, target, 0, Cause::FollowUp);
        }
        ActionKind::ReopenPort => {
            let Some(port) = target.port_id() else {
                return;
            };
            for unit in st.hierarchy.unit_ids(port) {
                let _ = policy::reopen(st, TargetRef::unit(port, unit), 0, Cause::FollowUp);
            }
        }
        ActionKind::ReopenUnit => {}
    }
}

fn followup_failed(st: &mut EngineState, kind: ActionKind, target: TargetRef) {
    let _ = match kind {
        ActionKind::ReopenAdapter | ActionKind::ReopenPortForced => {
            policy::reopen(st, TargetRef::Adapter, 0, Cause::FollowUp)
        }
        ActionKind::ReopenPort => policy::reopen_as(
            st,
            ActionKind::ReopenPortForced,
            target,
            0,
            Cause::FollowUp,
        ),
        ActionKind::ReopenUnit => match target.port_id() {
            Some(port) => policy::reopen(st, TargetRef::port(port), 0, Cause::FollowUp),
            None => return,
        },
    };
}

/// Port actions parked until the nameserver recovery finished get another
/// look at it.
fn wake_nameserver_waiters(st: &mut EngineState) {
    let waiting: Vec<TargetRef> = st
        .queue
        .running()
        .copied()
        .filter(|t| {
            st.hierarchy
                .action(*t)
                .is_some_and(|a| a.step == Step::Port(PortStep::NameserverOpen))
        })
        .collect();
    for target in waiting {
        if let Some(action) = st.hierarchy.action_mut(target) {
            action.timer = None;
        }
        st.queue.resume(target);
    }
}

/// Quiescence check once both lists are empty. An open nameserver port is
/// shut down first; returns true once nothing is left to do.
pub(crate) fn check_queues(st: &mut EngineState) -> bool {
    if !st.queue.is_empty() {
        return false;
    }
    if let Some(ns) = st.hierarchy.nameserver().map(TargetRef::port) {
        if st.hierarchy.has(ns, OPEN)
            && matches!(
                policy::shutdown(st, ns, 0, Cause::Nameserver),
                Ok(EnqueueOutcome::Queued { .. })
            )
        {
            return false;
        }
    }
    st.hierarchy.adapter.status.remove(AdapterStatus::ERP_PENDING);
    st.record(ErpEventKind::Quiesced);
    true
}
