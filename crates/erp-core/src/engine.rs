//! Public entry points of the recovery engine.
//!
//! An [`ErpEngine`] owns one adapter hierarchy and the worker thread that
//! recovers it. Every method takes the engine lock for a short, bounded
//! section and never calls into [`FabricServices`] itself.

use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use erp_common::{
    ActionKind, AdapterStatus, ErpError, Lun, PortId, Result, TargetRef, UnitId, UnitStatus, Wwpn,
};
use erp_config::{validate_config, ErpConfig};

use crate::blocking::StatusOp;
use crate::journal::{Cause, ErpEvent, ErpEventKind};
use crate::logging::{event_names, generate_run_id, LogContext, Stage};
use crate::policy::{self, EnqueueOutcome};
use crate::services::{CompletionHandle, FabricServices};
use crate::snapshot::ErpSnapshot;
use crate::state::{EngineState, Shared};
use crate::worker;

/// Handle to a running recovery engine for one adapter.
///
/// Dropping the handle stops the worker.
pub struct ErpEngine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    ctx: LogContext,
}

impl ErpEngine {
    /// Validate `config`, build an empty hierarchy for adapter `name` and
    /// start its worker.
    ///
    /// The adapter starts neither running nor open; call
    /// [`ErpEngine::set_online`] on [`TargetRef::Adapter`] to bring it up.
    pub fn start(
        name: impl Into<String>,
        config: ErpConfig,
        services: Arc<dyn FabricServices>,
    ) -> Result<Self> {
        validate_config(&config).map_err(|e| ErpError::Config(e.to_string()))?;
        let ctx = LogContext::new(generate_run_id(), name);

        let mut state = EngineState::new(config, ctx.clone());
        state
            .hierarchy
            .adapter
            .status
            .insert(AdapterStatus::WORKER_UP);
        state.record(ErpEventKind::WorkerStarted);

        let shared = Arc::new(Shared::new(state, services));
        let worker = match worker::spawn(Arc::clone(&shared), &ctx.adapter) {
            Ok(handle) => handle,
            Err(e) => {
                shared
                    .lock()
                    .hierarchy
                    .adapter
                    .status
                    .remove(AdapterStatus::WORKER_UP);
                crate::log_event!(
                    ctx,
                    ERROR,
                    event_names::WORKER_STOPPED,
                    Stage::Lifecycle,
                    "worker failed to start",
                    error = %e
                );
                return Err(e);
            }
        };

        Ok(ErpEngine {
            shared,
            worker: Some(worker),
            ctx,
        })
    }

    pub fn name(&self) -> &str {
        &self.ctx.adapter
    }

    pub fn run_id(&self) -> &str {
        &self.ctx.run_id
    }

    /// Handle through which the hardware-request layer reports completions.
    pub fn completion_handle(&self) -> CompletionHandle {
        CompletionHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Run `f` under the lock, then wake the worker.
    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let out = {
            let mut st = self.shared.lock();
            f(&mut st)
        };
        self.shared.wake.notify_all();
        out
    }

    pub fn add_port(&self, wwpn: Wwpn) -> Result<PortId> {
        self.shared.lock().hierarchy.add_port(wwpn)
    }

    pub fn add_unit(&self, port: PortId, lun: Lun) -> Result<UnitId> {
        self.shared.lock().hierarchy.add_unit(port, lun)
    }

    pub fn remove_port(&self, port: PortId) -> Result<()> {
        self.shared.lock().hierarchy.remove_port(port)
    }

    pub fn remove_unit(&self, port: PortId, unit: UnitId) -> Result<()> {
        self.shared.lock().hierarchy.remove_unit(port, unit)
    }

    /// Put `target` and everything beneath it into service and recover it,
    /// re-arming a target that was marked failed.
    pub fn set_online(&self, target: TargetRef) -> Result<EnqueueOutcome> {
        self.with_state(|st| {
            st.hierarchy.require(target)?;
            st.hierarchy.modify_status(
                target,
                UnitStatus::RUNNING.bits(),
                StatusOp::Set,
            );
            policy::reopen(st, target, UnitStatus::ERP_FAILED.bits(), Cause::External)
        })
    }

    /// Report an error seen on normal traffic to `target`.
    pub fn notify_failure(&self, target: TargetRef) -> Result<EnqueueOutcome> {
        self.reopen(target, 0)
    }

    /// Block `target`, clearing `clear_mask`, and queue its recovery.
    pub fn reopen(&self, target: TargetRef, clear_mask: u32) -> Result<EnqueueOutcome> {
        self.with_state(|st| policy::reopen(st, target, clear_mask, Cause::External))
    }

    /// Reopen a port by closing its physical connection first.
    pub fn reopen_forced(&self, port: PortId, clear_mask: u32) -> Result<EnqueueOutcome> {
        self.with_state(|st| {
            policy::reopen_as(
                st,
                ActionKind::ReopenPortForced,
                TargetRef::port(port),
                clear_mask,
                Cause::External,
            )
        })
    }

    /// Ask for recovery of `kind` without blocking anything first.
    pub fn request(&self, kind: ActionKind, target: TargetRef) -> Result<EnqueueOutcome> {
        self.with_state(|st| policy::enqueue(st, kind, target, Cause::External))
    }

    /// Take `target` out of service. The resulting action only closes.
    pub fn shutdown(&self, target: TargetRef, clear_mask: u32) -> Result<EnqueueOutcome> {
        self.with_state(|st| policy::shutdown(st, target, clear_mask, Cause::External))
    }

    /// Mark `target` permanently failed. Only [`ErpEngine::set_online`] or a
    /// reopen clearing `ERP_FAILED` re-arms it.
    pub fn mark_failed(&self, target: TargetRef) -> Result<()> {
        self.with_state(|st| {
            st.hierarchy.require(target)?;
            policy::mark_failed(st, target);
            Ok(())
        })
    }

    pub fn block(&self, target: TargetRef, clear_mask: u32) -> Result<()> {
        let mut st = self.shared.lock();
        st.hierarchy.require(target)?;
        st.hierarchy.block(target, clear_mask);
        Ok(())
    }

    pub fn unblock(&self, target: TargetRef) -> Result<()> {
        let mut st = self.shared.lock();
        st.hierarchy.require(target)?;
        st.hierarchy.unblock(target);
        Ok(())
    }

    /// Fast-fail gate for normal I/O to `target`.
    pub fn check_io(&self, target: TargetRef) -> Result<()> {
        let st = self.shared.lock();
        st.hierarchy.require(target)?;
        if st.hierarchy.has(target, UnitStatus::ERP_FAILED.bits()) {
            return Err(ErpError::TargetFailed(target));
        }
        if !st.hierarchy.has(target, UnitStatus::UNBLOCKED.bits()) {
            return Err(ErpError::NotReady(target));
        }
        Ok(())
    }

    /// Block until no recovery is pending or the worker has stopped.
    pub fn wait_for_quiescence(&self) {
        let mut st = self.shared.lock();
        while st.erp_pending() && st.worker_up() {
            st = self
                .shared
                .done
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`ErpEngine::wait_for_quiescence`], giving up after `timeout`.
    /// Returns true if recovery settled.
    pub fn wait_for_quiescence_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.lock();
        while st.erp_pending() && st.worker_up() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = match self.shared.done.wait_timeout(st, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        !st.erp_pending()
    }

    pub fn snapshot(&self) -> ErpSnapshot {
        ErpSnapshot::capture(&self.shared.lock())
    }

    /// Journal entries still held, oldest first.
    pub fn events(&self) -> Vec<ErpEvent> {
        self.shared.lock().journal.events()
    }

    pub fn config(&self) -> ErpConfig {
        self.shared.lock().config.clone()
    }

    /// Shut the adapter down, wait up to `timeout` for recovery to settle and
    /// stop the worker. The worker is stopped even when waiting times out.
    pub fn shutdown_all(&mut self, timeout: Duration) -> Result<()> {
        match self.shutdown(TargetRef::Adapter, 0) {
            Ok(_) | Err(ErpError::WorkerNotRunning) => {}
            Err(e) => return Err(e),
        }
        let settled = self.wait_for_quiescence_timeout(timeout);
        self.stop();
        if settled {
            Ok(())
        } else {
            Err(ErpError::QuiescenceTimeout {
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    /// Stop the worker and wait for it to exit. Actions still queued are
    /// abandoned; callers should only stop once nothing new is enqueued.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.with_state(|st| st.kill = true);
        if handle.join().is_err() {
            crate::log_event!(
                self.ctx,
                ERROR,
                event_names::WORKER_STOPPED,
                Stage::Lifecycle,
                "worker panicked"
            );
            let mut st = self.shared.lock();
            st.hierarchy
                .adapter
                .status
                .remove(AdapterStatus::WORKER_UP);
            drop(st);
            self.shared.done.notify_all();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.lock().worker_up()
    }
}

impl Drop for ErpEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ErpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErpEngine")
            .field("adapter", &self.ctx.adapter)
            .field("run_id", &self.ctx.run_id)
            .field("worker", &self.worker.is_some())
            .finish()
    }
}
