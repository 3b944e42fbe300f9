//! Journal queries shared by the integration tests.

#![allow(dead_code)]

use erp_common::{ActionKind, TargetRef};
use erp_core::action::StrategyResult;
use erp_core::{Cause, ErpEvent, ErpEventKind};

/// Index of the first event at or after `from` matching `pred`.
pub fn position(events: &[ErpEvent], from: usize, pred: impl Fn(&ErpEventKind) -> bool) -> Option<usize> {
    events
        .iter()
        .skip(from)
        .position(|e| pred(&e.kind))
        .map(|i| i + from)
}

/// Every `Finished` entry for `target`, as (result, retries).
pub fn finished(events: &[ErpEvent], target: TargetRef) -> Vec<(StrategyResult, u32)> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            ErpEventKind::Finished {
                target: t,
                result,
                retries,
                ..
            } if t == target => Some((result, retries)),
            _ => None,
        })
        .collect()
}

pub fn is_finished(kind: &ErpEventKind, target: TargetRef, result: StrategyResult) -> bool {
    matches!(kind, ErpEventKind::Finished { target: t, result: r, .. } if *t == target && *r == result)
}

pub fn is_enqueued(kind: &ErpEventKind, action: ActionKind, target: TargetRef, cause: Cause) -> bool {
    matches!(
        kind,
        ErpEventKind::Enqueued { kind: k, target: t, cause: c }
            if *k == action && *t == target && *c == cause
    )
}

pub fn enqueued_count(events: &[ErpEvent], pred: impl Fn(ActionKind, TargetRef, Cause) -> bool) -> usize {
    events
        .iter()
        .filter(|e| match e.kind {
            ErpEventKind::Enqueued {
                kind,
                target,
                cause,
            } => pred(kind, target, cause),
            _ => false,
        })
        .count()
}

/// Every `Enqueued` for `target` must be matched by exactly one `Dequeued`.
pub fn assert_balanced(events: &[ErpEvent], target: TargetRef) {
    let enqueued = events
        .iter()
        .filter(|e| matches!(e.kind, ErpEventKind::Enqueued { target: t, .. } if t == target))
        .count();
    let dequeued = events
        .iter()
        .filter(|e| matches!(e.kind, ErpEventKind::Dequeued { target: t, .. } if t == target))
        .count();
    assert_eq!(enqueued, dequeued, "unbalanced actions on {}", target);
}
