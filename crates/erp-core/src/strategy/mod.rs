//! Recovery strategies: one step machine per action kind.
//!
//! A strategy runs on the worker thread without the engine lock. It takes
//! the lock only for short reads and updates through [`StrategyCtx`] and
//! never while calling into the fabric.

mod adapter;
mod port;
mod port_forced;
mod unit;

use std::time::{Duration, Instant};

use erp_common::{ActionFlags, RequestId, SubmitError, TargetRef, UnitStatus};

use crate::action::{OutstandingRequest, Step, StrategyResult, Timer, TimerKind};
use crate::blocking::StatusOp;
use crate::journal::ErpEventKind;
use crate::request::RequestKind;
use crate::services::{FabricServices, PortAddress, Submitted, UnitAddress};
use crate::state::{EngineState, Shared};

/// Advance the action on `target` from `step`.
pub(crate) fn run(shared: &Shared, target: TargetRef, step: Step) -> StrategyResult {
    let ctx = StrategyCtx { shared, target };
    match step {
        Step::Adapter(step) => adapter::run(&ctx, step),
        Step::PortForced(step) => port_forced::run(&ctx, step),
        Step::Port(step) => port::run(&ctx, step),
        Step::Unit(step) => unit::run(&ctx, step),
    }
}

const OPENING: u32 = UnitStatus::OPENING.bits();
const CLOSING: u32 = UnitStatus::CLOSING.bits();

/// Transient bits cleared at the start of every target recovery.
pub(crate) const TRANSIENT: u32 = OPENING | CLOSING;

/// Handle a strategy uses to reach engine state and the fabric.
pub(crate) struct StrategyCtx<'a> {
    shared: &'a Shared,
    pub target: TargetRef,
}

enum Payload {
    None,
    Port(PortAddress),
    Unit(UnitAddress),
}

impl<'a> StrategyCtx<'a> {
    pub fn services(&self) -> &dyn FabricServices {
        self.shared.services.as_ref()
    }

    /// Run `f` under the engine lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut st = self.shared.lock();
        f(&mut st)
    }

    pub fn has(&self, target: TargetRef, mask: u32) -> bool {
        self.with_state(|st| st.hierarchy.has(target, mask))
    }

    pub fn flags(&self) -> ActionFlags {
        self.with_state(|st| {
            st.hierarchy
                .action(self.target)
                .map(|a| a.flags)
                .unwrap_or_default()
        })
    }

    pub fn is_close_only(&self) -> bool {
        self.flags().contains(ActionFlags::CLOSE_ONLY)
    }

    pub fn set_status(&self, target: TargetRef, mask: u32) {
        self.with_state(|st| st.hierarchy.set_target_status(target, mask, StatusOp::Set));
    }

    pub fn clear_status(&self, target: TargetRef, mask: u32) {
        self.with_state(|st| st.hierarchy.set_target_status(target, mask, StatusOp::Clear));
    }

    pub fn set_step(&self, step: Step) {
        self.with_state(|st| {
            if let Some(action) = st.hierarchy.action_mut(self.target) {
                action.step = step;
            }
        });
    }

    /// Suspend at `step` until `delay` has passed.
    pub fn wait(&self, step: Step, delay: Duration) -> StrategyResult {
        self.with_state(|st| {
            if let Some(action) = st.hierarchy.action_mut(self.target) {
                action.step = step;
                action.timer = Some(Timer {
                    deadline: Instant::now() + delay,
                    kind: TimerKind::Delay,
                });
            }
        });
        StrategyResult::Continues
    }

    /// Suspend at `step` waiting on another action rather than a request.
    /// The wait is bounded by the request timeout; when it fires the action
    /// resumes with [`ActionFlags::TIMED_OUT`] set.
    pub fn park(&self, step: Step) -> StrategyResult {
        self.with_state(|st| {
            let deadline = Instant::now() + st.config.request_timeout();
            if let Some(action) = st.hierarchy.action_mut(self.target) {
                action.step = step;
                action.flags.remove(ActionFlags::TIMED_OUT);
                action.timer = Some(Timer {
                    deadline,
                    kind: TimerKind::Request,
                });
            }
        });
        StrategyResult::Continues
    }

    /// Hand an unsolicited status buffer to the adapter. Nobody waits for
    /// its completion.
    pub fn submit_status_read(&self) -> Result<(), SubmitError> {
        let id = self.with_state(|st| st.requests.register(RequestKind::StatusRead, None));
        match self.services().submit_status_read(id) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.with_state(|st| st.requests.take(id));
                Err(err)
            }
        }
    }

    /// Submit `kind` on behalf of this action and suspend at `step`.
    ///
    /// The request is registered and its timeout armed before the fabric
    /// sees it, so a completion delivered from inside the submit call finds
    /// everything in place. On failure the action is left at the step it
    /// had before, which is where a memory wait resumes.
    pub fn submit(&self, kind: RequestKind, step: Step) -> StrategyResult {
        let prepared = self.with_state(|st| {
            let action = st.hierarchy.action(self.target)?;
            if action.is_dismissed() {
                return Some(Err(()));
            }
            let previous = action.step;
            let payload = payload(st, kind)?;
            let id = st.requests.register(kind, Some(self.target));
            let deadline = Instant::now() + st.config.request_timeout();
            if let Some(action) = st.hierarchy.action_mut(self.target) {
                action.step = step;
                action.request = Some(OutstandingRequest {
                    id,
                    low_memory: false,
                });
                action.flags.remove(ActionFlags::TIMED_OUT);
                action.timer = Some(Timer {
                    deadline,
                    kind: TimerKind::Request,
                });
            }
            st.hierarchy
                .set_target_status(kind.target(), transition_bit(kind), StatusOp::Set);
            st.record(ErpEventKind::Submitted {
                target: self.target,
                request: id,
                request_kind: kind,
            });
            Some(Ok((id, previous, payload)))
        });

        let (id, previous, payload) = match prepared {
            Some(Ok(prepared)) => prepared,
            // dismissed meanwhile; the worker discards the action
            Some(Err(())) => return StrategyResult::Continues,
            // target vanished
            None => return StrategyResult::Failed,
        };

        match dispatch(self.services(), id, kind, &payload) {
            Ok(Submitted { low_memory }) => {
                if low_memory {
                    self.with_state(|st| {
                        st.requests.mark_low_memory(id);
                        if let Some(action) = st.hierarchy.action_mut(self.target) {
                            if let Some(req) = action.request.as_mut().filter(|r| r.id == id) {
                                req.low_memory = true;
                            }
                        }
                    });
                }
                StrategyResult::Continues
            }
            Err(err) => {
                self.with_state(|st| {
                    st.requests.take(id);
                    st.hierarchy
                        .set_target_status(kind.target(), transition_bit(kind), StatusOp::Clear);
                    if let Some(action) = st.hierarchy.action_mut(self.target) {
                        if action.request.map(|r| r.id) == Some(id) {
                            action.request = None;
                            action.timer = None;
                            action.step = previous;
                        }
                    }
                });
                match err {
                    SubmitError::NoMemory => StrategyResult::NoMem,
                    SubmitError::Device(_) => StrategyResult::Failed,
                }
            }
        }
    }
}

fn transition_bit(kind: RequestKind) -> u32 {
    match kind {
        RequestKind::ExchangeConfig | RequestKind::OpenPort { .. } | RequestKind::OpenUnit { .. } => {
            OPENING
        }
        RequestKind::ClosePort { .. }
        | RequestKind::ClosePhysicalPort { .. }
        | RequestKind::CloseUnit { .. } => CLOSING,
        RequestKind::StatusRead | RequestKind::NameserverLookup { .. } => 0,
    }
}

fn payload(st: &EngineState, kind: RequestKind) -> Option<Payload> {
    let h = &st.hierarchy;
    match kind {
        RequestKind::ExchangeConfig | RequestKind::StatusRead => Some(Payload::None),
        RequestKind::OpenPort { port }
        | RequestKind::ClosePort { port }
        | RequestKind::ClosePhysicalPort { port }
        | RequestKind::NameserverLookup { port } => h.port_address(port).map(Payload::Port),
        RequestKind::OpenUnit { port, unit } | RequestKind::CloseUnit { port, unit } => {
            h.unit_address(port, unit).map(Payload::Unit)
        }
    }
}

fn dispatch(
    services: &dyn FabricServices,
    id: RequestId,
    kind: RequestKind,
    payload: &Payload,
) -> Result<Submitted, SubmitError> {
    match (kind, payload) {
        (RequestKind::ExchangeConfig, _) => services.submit_exchange_config(id),
        (RequestKind::StatusRead, _) => services.submit_status_read(id),
        (RequestKind::OpenPort { .. }, Payload::Port(addr)) => services.submit_open_port(id, addr),
        (RequestKind::ClosePort { .. }, Payload::Port(addr)) => {
            services.submit_close_port(id, addr)
        }
        (RequestKind::ClosePhysicalPort { .. }, Payload::Port(addr)) => {
            services.submit_close_physical_port(id, addr)
        }
        (RequestKind::NameserverLookup { .. }, Payload::Port(addr)) => {
            services.submit_nameserver_lookup(id, addr.wwpn)
        }
        (RequestKind::OpenUnit { .. }, Payload::Unit(addr)) => services.submit_open_unit(id, addr),
        (RequestKind::CloseUnit { .. }, Payload::Unit(addr)) => {
            services.submit_close_unit(id, addr)
        }
        _ => Err(SubmitError::Device(format!("no address for {}", kind.name()))),
    }
}
