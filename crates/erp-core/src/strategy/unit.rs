use erp_common::{TargetRef, UnitStatus};

use super::{StrategyCtx, TRANSIENT};
use crate::action::{Step, StrategyResult, UnitStep};
use crate::request::RequestKind;

const OPEN: u32 = UnitStatus::OPEN.bits();

/// Close the unit if it is open, then open it again.
pub(super) fn run(ctx: &StrategyCtx<'_>, step: UnitStep) -> StrategyResult {
    let TargetRef::Unit { port, unit } = ctx.target else {
        return StrategyResult::Exit;
    };
    match step {
        UnitStep::Uninitialized => {
            ctx.clear_status(ctx.target, TRANSIENT);
            if ctx.has(ctx.target, OPEN) {
                return ctx.submit(
                    RequestKind::CloseUnit { port, unit },
                    Step::Unit(UnitStep::Closing),
                );
            }
            closed(ctx)
        }
        UnitStep::Closing => {
            if ctx.has(ctx.target, OPEN) {
                return StrategyResult::Failed;
            }
            closed(ctx)
        }
        UnitStep::Opening => {
            if ctx.has(ctx.target, OPEN) {
                StrategyResult::Succeeded
            } else {
                StrategyResult::Failed
            }
        }
    }
}

fn closed(ctx: &StrategyCtx<'_>) -> StrategyResult {
    if ctx.is_close_only() {
        return StrategyResult::Exit;
    }
    let TargetRef::Unit { port, unit } = ctx.target else {
        return StrategyResult::Exit;
    };
    ctx.submit(
        RequestKind::OpenUnit { port, unit },
        Step::Unit(UnitStep::Opening),
    )
}
