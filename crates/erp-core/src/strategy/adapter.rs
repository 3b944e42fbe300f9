//! Adapter recovery: close everything, then bring the transport and the
//! adapter configuration back up.

use erp_common::{AdapterStatus, PortStatus, TargetRef, UnitStatus};

use super::StrategyCtx;
use crate::action::{AdapterStep, Step, StrategyResult};
use crate::blocking::StatusOp;
use crate::request::RequestKind;

pub(super) fn run(ctx: &StrategyCtx<'_>, step: AdapterStep) -> StrategyResult {
    match step {
        AdapterStep::Uninitialized => {
            close(ctx);
            if ctx.is_close_only() {
                return StrategyResult::Exit;
            }
            open(ctx)
        }
        AdapterStep::ExchangeConfigBackoff { attempt } => exchange_config(ctx, attempt),
        AdapterStep::ExchangeConfig { attempt } => exchange_config_done(ctx, attempt),
        AdapterStep::FailedDelay => StrategyResult::Failed,
    }
}

/// Tear down the transport and forget every request. Ports and units lose
/// `OPEN` with it; the fabric dropped their sessions.
fn close(ctx: &StrategyCtx<'_>) {
    ctx.services().transport_tear_down();
    ctx.services().discard_outstanding_requests();
    ctx.with_state(|st| {
        st.requests.clear();
        st.hierarchy.modify_status(
            TargetRef::Adapter,
            (UnitStatus::OPEN | UnitStatus::OPENING | UnitStatus::CLOSING).bits(),
            StatusOp::Clear,
        );
        for port in st.hierarchy.port_ids() {
            if let Some(p) = st.hierarchy.port_mut(port) {
                p.status.remove(PortStatus::PHYS_OPEN);
            }
        }
        st.hierarchy.adapter.status.remove(
            AdapterStatus::TRANSPORT_UP | AdapterStatus::XCONFIG_OK | AdapterStatus::HOST_CON_INIT,
        );
    });
}

fn open(ctx: &StrategyCtx<'_>) -> StrategyResult {
    if ctx.services().transport_bring_up().is_err() {
        return failed(ctx);
    }
    ctx.set_status(TargetRef::Adapter, AdapterStatus::TRANSPORT_UP.bits());
    // a memory wait on the first exchange resumes here, past the close
    ctx.set_step(Step::Adapter(AdapterStep::ExchangeConfigBackoff { attempt: 1 }));
    exchange_config(ctx, 1)
}

fn exchange_config(ctx: &StrategyCtx<'_>, attempt: u32) -> StrategyResult {
    ctx.clear_status(
        TargetRef::Adapter,
        (AdapterStatus::HOST_CON_INIT | AdapterStatus::XCONFIG_OK).bits(),
    );
    match ctx.submit(
        RequestKind::ExchangeConfig,
        Step::Adapter(AdapterStep::ExchangeConfig { attempt }),
    ) {
        StrategyResult::Failed => failed(ctx),
        other => other,
    }
}

fn exchange_config_done(ctx: &StrategyCtx<'_>, attempt: u32) -> StrategyResult {
    let (status, timed_out, retries, delay, primers) = ctx.with_state(|st| {
        let timed_out = st
            .hierarchy
            .action(TargetRef::Adapter)
            .is_some_and(|a| a.is_timed_out());
        (
            st.hierarchy.adapter.status,
            timed_out,
            st.config.exchange_config_retries,
            st.config.exchange_config_delay(attempt),
            st.config.status_read_primers,
        )
    });

    if timed_out {
        return failed(ctx);
    }
    if status.contains(AdapterStatus::HOST_CON_INIT) {
        if attempt > retries {
            return failed(ctx);
        }
        return ctx.wait(
            Step::Adapter(AdapterStep::ExchangeConfigBackoff {
                attempt: attempt + 1,
            }),
            delay,
        );
    }
    if !status.contains(AdapterStatus::XCONFIG_OK) {
        return failed(ctx);
    }

    for _ in 0..primers {
        if ctx.submit_status_read().is_err() {
            return failed(ctx);
        }
    }
    ctx.set_status(TargetRef::Adapter, AdapterStatus::OPEN.bits());
    StrategyResult::Succeeded
}

/// Undo a partial open and pause before reporting the failure.
fn failed(ctx: &StrategyCtx<'_>) -> StrategyResult {
    close(ctx);
    let delay = ctx.with_state(|st| st.config.failed_delay());
    if delay.is_zero() {
        return StrategyResult::Failed;
    }
    ctx.wait(Step::Adapter(AdapterStep::FailedDelay), delay)
}
