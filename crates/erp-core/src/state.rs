//! Engine state and the lock that guards it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use erp_common::{AdapterStatus, PortId, RequestId, UnitId};
use erp_config::ErpConfig;

use crate::hierarchy::Hierarchy;
use crate::journal::{ErpEventKind, Journal};
use crate::logging::LogContext;
use crate::queue::ActionQueue;
use crate::request::RequestTable;
use crate::services::FabricServices;

/// Action counters used by the low-memory rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounters {
    /// Actions queued or running.
    pub total: u32,
    /// Actions whose last attempt ran out of request memory.
    pub low_mem: u32,
}

/// Everything the per-adapter lock protects.
#[derive(Debug)]
pub struct EngineState {
    pub hierarchy: Hierarchy,
    pub queue: ActionQueue,
    pub requests: RequestTable,
    pub journal: Journal,
    pub counters: ActionCounters,
    pub config: ErpConfig,
    /// Set by `stop`; the worker exits on its next pass.
    pub kill: bool,
    /// Requests abandoned under the lock, to be dismissed at the fabric
    /// layer once the worker has released it.
    pub pending_dismissals: Vec<RequestId>,
    /// Units that succeeded for the first time and still need a device.
    pub pending_registrations: Vec<(PortId, UnitId)>,
}

impl EngineState {
    pub fn new(config: ErpConfig, ctx: LogContext) -> Self {
        let journal = Journal::new(ctx, config.event_history);
        EngineState {
            hierarchy: Hierarchy::new(),
            queue: ActionQueue::new(),
            requests: RequestTable::new(),
            journal,
            counters: ActionCounters::default(),
            config,
            kill: false,
            pending_dismissals: Vec::new(),
            pending_registrations: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: ErpEventKind) {
        self.journal.record(kind);
    }

    pub fn worker_up(&self) -> bool {
        self.hierarchy
            .adapter
            .status
            .contains(AdapterStatus::WORKER_UP)
    }

    pub fn erp_pending(&self) -> bool {
        self.hierarchy
            .adapter
            .status
            .contains(AdapterStatus::ERP_PENDING)
    }

    /// Earliest armed timer across all actions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .running()
            .chain(self.queue.ready())
            .filter_map(|t| self.hierarchy.action(*t))
            .filter_map(|a| a.timer.map(|timer| timer.deadline))
            .min()
    }

    /// True if the worker has something to do right now.
    pub fn has_work(&self) -> bool {
        self.kill
            || self.queue.ready().next().is_some()
            || !self.pending_dismissals.is_empty()
            || !self.pending_registrations.is_empty()
    }
}

/// State shared between the engine handle, the worker and completion
/// handles.
pub struct Shared {
    pub(crate) state: Mutex<EngineState>,
    /// Wakes the worker.
    pub(crate) wake: Condvar,
    /// Signalled when recovery quiesces or the worker stops.
    pub(crate) done: Condvar,
    pub(crate) services: Arc<dyn FabricServices>,
}

impl Shared {
    pub(crate) fn new(state: EngineState, services: Arc<dyn FabricServices>) -> Self {
        Shared {
            state: Mutex::new(state),
            wake: Condvar::new(),
            done: Condvar::new(),
            services,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_or_recover(&self.state)
    }
}

/// A panic while holding the lock leaves the state consistent enough to
/// keep going; every mutation completes before any call that could panic.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ErpAction, Timer, TimerKind};
    use erp_common::{ActionFlags, ActionKind, TargetRef, Wwpn};
    use std::time::Duration;

    fn state() -> EngineState {
        EngineState::new(ErpConfig::default(), LogContext::new("run-test", "adapter0"))
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut st = state();
        let p = st.hierarchy.add_port(Wwpn(1)).unwrap();
        let now = Instant::now();
        for (target, offset) in [(TargetRef::Adapter, 50), (TargetRef::port(p), 10)] {
            let mut action = ErpAction::new(ActionKind::for_target(target), target, ActionFlags::empty());
            action.timer = Some(Timer {
                deadline: now + Duration::from_millis(offset),
                kind: TimerKind::Delay,
            });
            st.hierarchy.slot_mut(target).unwrap().action = Some(action);
            st.queue.enqueue(target);
            let popped = st.queue.pop_ready().unwrap();
            st.queue.to_running(popped);
        }
        assert_eq!(st.next_deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn test_has_work() {
        let mut st = state();
        assert!(!st.has_work());
        st.pending_dismissals.push(RequestId(4));
        assert!(st.has_work());
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(1u32));
        let m = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = m.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*lock_or_recover(&mutex), 1);
    }
}
