//! Port recovery.
//!
//! Remote ports are reached through the nameserver: its own port must be
//! open before the WWPN can be resolved to a fabric address, and only a
//! resolved port can be opened. The nameserver port is opened at its
//! well-known address.

use erp_common::{ActionFlags, PortId, PortStatus, TargetRef};

use super::{StrategyCtx, TRANSIENT};
use crate::action::{PortStep, Step, StrategyResult};
use crate::blocking::StatusOp;
use crate::journal::{Cause, DropReason};
use crate::policy::{self, EnqueueOutcome};
use crate::request::RequestKind;

const OPEN: u32 = PortStatus::OPEN.bits();
const RUNNING: u32 = PortStatus::RUNNING.bits();
const UNBLOCKED: u32 = PortStatus::UNBLOCKED.bits();
const FAILED: u32 = PortStatus::ERP_FAILED.bits();
const INUSE: u32 = PortStatus::ERP_INUSE.bits();
const DID_VALID: u32 = PortStatus::DID_VALID.bits();
const WWPN_INVALID: u32 = PortStatus::WWPN_INVALID.bits();

pub(super) fn run(ctx: &StrategyCtx<'_>, step: PortStep) -> StrategyResult {
    let TargetRef::Port { port } = ctx.target else {
        return StrategyResult::Exit;
    };
    match step {
        PortStep::Uninitialized => {
            ctx.clear_status(ctx.target, TRANSIENT);
            if ctx.has(ctx.target, OPEN) {
                return ctx.submit(RequestKind::ClosePort { port }, Step::Port(PortStep::Closing));
            }
            closed(ctx, port)
        }
        PortStep::Closing => {
            if ctx.has(ctx.target, OPEN) {
                return StrategyResult::Failed;
            }
            closed(ctx, port)
        }
        PortStep::NameserverOpen => {
            if ctx.flags().contains(ActionFlags::TIMED_OUT) {
                // the nameserver never came back in time
                return StrategyResult::Failed;
            }
            nameserver_ready(ctx, port)
        }
        PortStep::NameserverLookup => looked_up(ctx, port),
        PortStep::Opening => {
            let need = if is_nameserver(ctx, port) {
                OPEN
            } else {
                OPEN | DID_VALID
            };
            if ctx.has(ctx.target, need) {
                StrategyResult::Succeeded
            } else {
                StrategyResult::Failed
            }
        }
    }
}

fn is_nameserver(ctx: &StrategyCtx<'_>, port: PortId) -> bool {
    ctx.with_state(|st| st.hierarchy.port(port).is_some_and(|p| p.is_nameserver()))
}

fn closed(ctx: &StrategyCtx<'_>, port: PortId) -> StrategyResult {
    if ctx.is_close_only() {
        return StrategyResult::Exit;
    }
    if is_nameserver(ctx, port) {
        return open(ctx, port);
    }
    if ctx.has(ctx.target, WWPN_INVALID) {
        ctx.with_state(|st| policy::mark_failed(st, ctx.target));
        return StrategyResult::Exit;
    }
    ctx.clear_status(ctx.target, DID_VALID);
    ensure_nameserver(ctx, port)
}

fn open(ctx: &StrategyCtx<'_>, port: PortId) -> StrategyResult {
    ctx.submit(RequestKind::OpenPort { port }, Step::Port(PortStep::Opening))
}

/// Get the nameserver port open, or wait for its recovery to finish.
fn ensure_nameserver(ctx: &StrategyCtx<'_>, port: PortId) -> StrategyResult {
    let waiting = ctx.with_state(|st| {
        let ns = TargetRef::port(st.hierarchy.ensure_nameserver());
        if st.hierarchy.has(ns, UNBLOCKED | RUNNING) {
            return Ok(false);
        }
        st.hierarchy.set_target_status(ns, RUNNING, StatusOp::Set);
        match policy::reopen(st, ns, 0, Cause::Nameserver) {
            Ok(EnqueueOutcome::Queued { .. }) => Ok(true),
            Ok(EnqueueOutcome::Dropped {
                reason: DropReason::InUse,
            }) => Ok(true),
            _ => Err(()),
        }
    });
    match waiting {
        Ok(true) => ctx.park(Step::Port(PortStep::NameserverOpen)),
        Ok(false) => {
            ctx.set_step(Step::Port(PortStep::NameserverOpen));
            nameserver_ready(ctx, port)
        }
        Err(()) => StrategyResult::Failed,
    }
}

/// Resumed after the nameserver's own recovery finished.
fn nameserver_ready(ctx: &StrategyCtx<'_>, port: PortId) -> StrategyResult {
    let ns = ctx.with_state(|st| st.hierarchy.nameserver().map(TargetRef::port));
    let Some(ns) = ns else {
        return ensure_nameserver(ctx, port);
    };
    let status = ctx.with_state(|st| st.hierarchy.status_bits(ns));
    if status & OPEN != 0 {
        return ctx.submit(
            RequestKind::NameserverLookup { port },
            Step::Port(PortStep::NameserverLookup),
        );
    }
    if status & INUSE != 0 {
        // its recovery was re-queued; keep waiting
        return ctx.park(Step::Port(PortStep::NameserverOpen));
    }
    if status & FAILED == 0 && status & RUNNING == 0 {
        // a quiescence shutdown closed it under us
        return ensure_nameserver(ctx, port);
    }
    StrategyResult::Failed
}

fn looked_up(ctx: &StrategyCtx<'_>, port: PortId) -> StrategyResult {
    let status = ctx.with_state(|st| st.hierarchy.status_bits(ctx.target));
    if status & WWPN_INVALID != 0 {
        ctx.with_state(|st| policy::mark_failed(st, ctx.target));
        return StrategyResult::Exit;
    }
    if status & DID_VALID != 0 {
        return open(ctx, port);
    }
    StrategyResult::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use erp_common::{ActionKind, AdapterStatus, UnitStatus, Wwpn};
    use erp_config::ErpConfig;

    use crate::action::TimerKind;
    use crate::bridge::fire_timers;
    use crate::logging::LogContext;
    use crate::sim::SimFabric;
    use crate::state::{EngineState, Shared};

    /// One remote port with nothing else up yet. No completion handle is
    /// attached, so every submitted request stays outstanding.
    fn shared() -> (Shared, TargetRef) {
        let mut st = EngineState::new(ErpConfig::default(), LogContext::new("run-test", "a0"));
        st.hierarchy.adapter.status.insert(AdapterStatus::WORKER_UP);
        let p = st.hierarchy.add_port(Wwpn(0x5005_0766_0000_0e00)).unwrap();
        let up = (UnitStatus::RUNNING | UnitStatus::UNBLOCKED).bits();
        st.hierarchy.modify_status(TargetRef::Adapter, up, StatusOp::Set);
        st.hierarchy
            .set_target_status(TargetRef::Adapter, AdapterStatus::OPEN.bits(), StatusOp::Set);

        let port = TargetRef::port(p);
        policy::enqueue(&mut st, ActionKind::ReopenPort, port, Cause::External).unwrap();
        let popped = st.queue.pop_ready().unwrap();
        st.queue.to_running(popped);
        (Shared::new(st, Arc::new(SimFabric::new())), port)
    }

    #[test]
    fn test_nameserver_wait_is_timer_guarded() {
        let (shared, port) = shared();
        let step = Step::Port(PortStep::Uninitialized);
        assert_eq!(super::super::run(&shared, port, step), StrategyResult::Continues);

        let st = shared.lock();
        let action = st.hierarchy.action(port).unwrap();
        assert_eq!(action.step, Step::Port(PortStep::NameserverOpen));
        assert!(action.request.is_none());
        assert_eq!(action.timer.map(|t| t.kind), Some(TimerKind::Request));
        let ns = TargetRef::port(st.hierarchy.nameserver().unwrap());
        assert!(st.hierarchy.action(ns).is_some());
    }

    #[test]
    fn test_lost_nameserver_wake_fails_the_port() {
        let (shared, port) = shared();
        super::super::run(&shared, port, Step::Port(PortStep::Uninitialized));

        let fired = {
            let mut st = shared.lock();
            fire_timers(&mut st, Instant::now() + Duration::from_secs(3600))
        };
        assert_eq!(fired, 1);
        let step = Step::Port(PortStep::NameserverOpen);
        assert_eq!(super::super::run(&shared, port, step), StrategyResult::Failed);
    }
}
