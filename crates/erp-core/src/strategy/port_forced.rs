use erp_common::{PortStatus, TargetRef};

use super::{StrategyCtx, TRANSIENT};
use crate::action::{PortForcedStep, Step, StrategyResult};
use crate::request::RequestKind;

/// Close the physical port, dropping every session through it.
pub(super) fn run(ctx: &StrategyCtx<'_>, step: PortForcedStep) -> StrategyResult {
    let TargetRef::Port { port } = ctx.target else {
        return StrategyResult::Exit;
    };
    match step {
        PortForcedStep::Uninitialized => {
            ctx.clear_status(ctx.target, TRANSIENT);
            let open = (PortStatus::PHYS_OPEN | PortStatus::OPEN).bits();
            if ctx.with_state(|st| st.hierarchy.status_bits(ctx.target) & open == 0) {
                return StrategyResult::Failed;
            }
            ctx.submit(
                RequestKind::ClosePhysicalPort { port },
                Step::PortForced(PortForcedStep::PhysClosing),
            )
        }
        PortForcedStep::PhysClosing => {
            if ctx.has(ctx.target, PortStatus::PHYS_OPEN.bits()) {
                StrategyResult::Failed
            } else {
                StrategyResult::Succeeded
            }
        }
    }
}
