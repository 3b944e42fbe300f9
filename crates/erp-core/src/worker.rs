//! The per-adapter recovery thread.
//!
//! One loop owns all action progress: fire timers, pick the next ready
//! action, run its strategy without the lock, finish or suspend it, and
//! sleep until woken or the nearest timer is due.

use std::mem;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use erp_common::{ActionFlags, AdapterStatus, ErpError, Result, TargetRef};

use crate::action::{StrategyResult, Timer, TimerKind};
use crate::bridge;
use crate::followup;
use crate::journal::{Cause, ErpEventKind};
use crate::policy;
use crate::state::{EngineState, Shared};
use crate::strategy;

pub(crate) fn spawn(shared: Arc<Shared>, adapter: &str) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("erp-{}", adapter))
        .spawn(move || run(&shared))
        .map_err(|e| ErpError::WorkerSpawn(e.to_string()))
}

fn run(shared: &Shared) {
    let mut st = shared.lock();
    loop {
        if st.kill {
            break;
        }

        if !st.pending_dismissals.is_empty() || !st.pending_registrations.is_empty() {
            st = fabric_cleanup(shared, st);
            continue;
        }

        bridge::fire_timers(&mut st, Instant::now());

        if let Some(target) = st.queue.pop_ready() {
            st = process(shared, st, target);
            continue;
        }

        if st.erp_pending() && st.queue.is_empty() {
            if followup::check_queues(&mut st) {
                shared.done.notify_all();
            }
            // the check may have queued a nameserver shutdown
            if st.queue.ready().next().is_some() {
                continue;
            }
        }

        st = match st.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match shared.wake.wait_timeout(st, timeout) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                }
            }
            None => shared
                .wake
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }

    st.hierarchy.adapter.status.remove(AdapterStatus::WORKER_UP);
    st.record(ErpEventKind::WorkerStopped);
    drop(st);
    shared.done.notify_all();
}

/// Dismiss abandoned requests and register newly usable units, both
/// outside the lock.
fn fabric_cleanup<'a>(
    shared: &'a Shared,
    mut st: MutexGuard<'a, EngineState>,
) -> MutexGuard<'a, EngineState> {
    let dismissals = mem::take(&mut st.pending_dismissals);
    let registrations: Vec<_> = mem::take(&mut st.pending_registrations)
        .into_iter()
        .filter_map(|(port, unit)| {
            st.hierarchy
                .unit_address(port, unit)
                .map(|addr| (port, unit, addr))
        })
        .collect();
    drop(st);

    for id in dismissals {
        shared.services.dismiss_request(id);
    }
    let devices: Vec<_> = registrations
        .into_iter()
        .map(|(port, unit, addr)| (port, unit, shared.services.register_unit(&addr)))
        .collect();

    let mut st = shared.lock();
    for (port, unit, device) in devices {
        if let Some(u) = st.hierarchy.unit_mut(port, unit) {
            if u.device.is_none() {
                u.device = device;
            }
        }
    }
    st
}

/// Take one action one step further.
fn process<'a>(
    shared: &'a Shared,
    mut st: MutexGuard<'a, EngineState>,
    target: TargetRef,
) -> MutexGuard<'a, EngineState> {
    let Some(action) = st.hierarchy.action(target) else {
        return st;
    };
    if action.is_dismissed() {
        followup::discard(&mut st, target);
        return st;
    }
    let step = action.step;
    st.queue.to_running(target);
    drop(st);

    let result = strategy::run(shared, target, step);

    let mut st = shared.lock();
    let dismissed = st
        .hierarchy
        .action(target)
        .map_or(true, |a| a.is_dismissed());
    if dismissed {
        // dismissal already put it back on the ready list
        return st;
    }
    match result {
        StrategyResult::Continues => clear_low_memory(&mut st, target),
        StrategyResult::NoMem => low_memory(&mut st, target),
        StrategyResult::Dismissed => followup::discard(&mut st, target),
        StrategyResult::Succeeded | StrategyResult::Failed | StrategyResult::Exit => {
            followup::finish(&mut st, target, result)
        }
    }
    st
}

fn clear_low_memory(st: &mut EngineState, target: TargetRef) {
    if let Some(action) = st.hierarchy.action_mut(target) {
        if action.flags.contains(ActionFlags::LOWMEM) {
            action.flags.remove(ActionFlags::LOWMEM);
            st.counters.low_mem = st.counters.low_mem.saturating_sub(1);
        }
    }
}

/// Out of request memory: wait and retry the same step, unless every
/// action is stuck the same way, in which case only an adapter reset
/// frees the pool.
fn low_memory(st: &mut EngineState, target: TargetRef) {
    if let Some(action) = st.hierarchy.action_mut(target) {
        if !action.flags.contains(ActionFlags::LOWMEM) {
            action.flags.insert(ActionFlags::LOWMEM);
            st.counters.low_mem += 1;
        }
    }
    st.record(ErpEventKind::LowMemory { target });

    if st.counters.low_mem == st.counters.total && target != TargetRef::Adapter {
        let reset = policy::reopen(st, TargetRef::Adapter, 0, Cause::LowMemory);
        if matches!(reset, Ok(out) if out.is_queued()) {
            return;
        }
    }

    let deadline = Instant::now() + st.config.memwait();
    if let Some(action) = st.hierarchy.action_mut(target) {
        action.timer = Some(Timer {
            deadline,
            kind: TimerKind::Delay,
        });
    }
}
