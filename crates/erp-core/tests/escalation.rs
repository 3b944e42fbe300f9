//! Escalation and enqueue policy through the public engine API.

mod common;

use std::time::Duration;

use common::{enqueued_count, is_finished, position};
use erp_common::{ActionKind, ErpError, Lun, PortStatus, TargetRef, UnitStatus};
use erp_config::ErpConfig;
use erp_core::action::StrategyResult;
use erp_core::sim::{SimFaults, SimRequest};
use erp_core::test_utils::{test_config, wait_until, SimHarness};
use erp_core::{assert_err, assert_ok, Cause, DropReason, EnqueueOutcome, ErpEventKind, RequestOutcome};

fn online_with_port(h: &SimHarness) -> (TargetRef, TargetRef) {
    let (p, units) = h.add_port(0x2000_0000_00aa, &[1]);
    assert_ok!(h.engine.set_online(TargetRef::Adapter));
    h.settle();
    (TargetRef::port(p), TargetRef::unit(p, units[0]))
}

#[test]
fn unit_reopen_under_blocked_port_queues_port_only() {
    let h = SimHarness::new();
    let (port, unit) = online_with_port(&h);
    let before = h.engine.events().len();

    assert_ok!(h.engine.block(port, 0));
    let out = assert_ok!(h.engine.reopen(unit, 0));
    assert_eq!(
        out,
        EnqueueOutcome::Queued {
            kind: ActionKind::ReopenPort,
            target: port
        }
    );

    h.settle();
    let events = h.engine.events();
    let fresh = &events[before..];
    assert!(position(fresh, 0, |k| matches!(
        k,
        ErpEventKind::Escalated {
            from: ActionKind::ReopenUnit,
            to: ActionKind::ReopenPort,
            ..
        }
    ))
    .is_some());
    assert_eq!(
        enqueued_count(fresh, |k, t, c| k == ActionKind::ReopenPort
            && t == port
            && c == Cause::External),
        1
    );
    // the only unit action is the port's follow-up
    assert_eq!(
        enqueued_count(fresh, |k, _, c| k == ActionKind::ReopenUnit && c == Cause::External),
        0
    );
    assert_eq!(
        enqueued_count(fresh, |k, _, c| k == ActionKind::ReopenUnit && c == Cause::FollowUp),
        1
    );
    assert_ok!(h.engine.check_io(unit));
}

#[test]
fn port_reopen_under_blocked_adapter_queues_adapter() {
    let h = SimHarness::new();
    let (port, _unit) = online_with_port(&h);

    assert_ok!(h.engine.block(TargetRef::Adapter, 0));
    let out = assert_ok!(h.engine.reopen(port, 0));
    assert_eq!(
        out,
        EnqueueOutcome::Queued {
            kind: ActionKind::ReopenAdapter,
            target: TargetRef::Adapter
        }
    );
    h.settle();
    assert_ok!(h.engine.check_io(TargetRef::Adapter));
    assert_ok!(h.engine.check_io(port));
}

#[test]
fn forced_reopen_of_closed_port_is_plain_reopen() {
    let h = SimHarness::new().online();
    let (p, _) = h.add_port(0x77, &[]);
    let out = assert_ok!(h.engine.reopen_forced(p, 0));
    assert_eq!(
        out,
        EnqueueOutcome::Queued {
            kind: ActionKind::ReopenPort,
            target: TargetRef::port(p)
        }
    );
    h.settle();
    // never put online, so the action only closed
    assert_eq!(
        h.sim.count(|r| matches!(r, SimRequest::NameserverLookup { .. })),
        0
    );
}

#[test]
fn forced_reopen_closes_physical_port_first() {
    let h = SimHarness::new();
    let (port, unit) = online_with_port(&h);

    let out = assert_ok!(h.engine.reopen_forced(port.port_id().unwrap(), 0));
    assert_eq!(
        out,
        EnqueueOutcome::Queued {
            kind: ActionKind::ReopenPortForced,
            target: port
        }
    );
    h.settle();

    assert_eq!(
        h.sim.count(|r| matches!(r, SimRequest::ClosePhysicalPort { .. })),
        1
    );
    let events = h.engine.events();
    let forced = position(&events, 0, |k| {
        matches!(
            k,
            ErpEventKind::Finished {
                kind: ActionKind::ReopenPortForced,
                result: StrategyResult::Succeeded,
                ..
            }
        )
    })
    .expect("forced reopen should succeed");
    assert!(position(&events, forced + 1, |k| is_finished(k, port, StrategyResult::Succeeded)).is_some());
    assert_ok!(h.engine.check_io(unit));
}

#[test]
fn busy_unit_under_blocked_port_recovers_port() {
    let config = ErpConfig {
        request_timeout_ms: 30_000,
        ..test_config()
    };
    let h = SimHarness::with(config, SimFaults::default());
    let (port, unit) = online_with_port(&h);

    h.sim.faults().hold_unit_opens = true;
    assert!(assert_ok!(h.engine.reopen(unit, 0)).is_queued());
    assert!(wait_until(Duration::from_secs(5), || h.sim.held() == 1));
    h.sim.faults().hold_unit_opens = false;

    // the port goes down while the unit's open is still outstanding
    assert_ok!(h.engine.block(port, 0));
    let out = assert_ok!(h.engine.reopen(unit, 0));
    assert_eq!(
        out,
        EnqueueOutcome::Queued {
            kind: ActionKind::ReopenPort,
            target: port
        }
    );

    h.settle();
    assert_eq!(h.sim.held(), 0);
    assert_ok!(h.engine.check_io(port));
    assert_ok!(h.engine.check_io(unit));
    let snap = h.engine.snapshot();
    assert!(snap.is_idle());
    assert_eq!(snap.total_actions, 0);
}

#[test]
fn repeated_reopen_keeps_one_action() {
    let config = ErpConfig {
        request_timeout_ms: 30_000,
        ..test_config()
    };
    let h = SimHarness::with(config, SimFaults::default());
    let (_port, unit) = online_with_port(&h);

    h.sim.faults().hold_unit_opens = true;
    assert!(assert_ok!(h.engine.reopen(unit, 0)).is_queued());
    assert!(wait_until(Duration::from_secs(5), || h.sim.held() == 1));

    for _ in 0..5 {
        let out = assert_ok!(h.engine.reopen(unit, 0));
        assert_eq!(
            out,
            EnqueueOutcome::Dropped {
                reason: DropReason::InUse
            }
        );
    }
    let snap = h.engine.snapshot();
    let listed = snap
        .ready
        .iter()
        .chain(snap.running.iter())
        .filter(|t| **t == unit)
        .count();
    assert_eq!(listed, 1);
    assert_eq!(snap.slot(unit).unwrap().refs, 1);

    h.sim.faults().hold_unit_opens = false;
    assert_eq!(h.sim.release_held(RequestOutcome::Success), 1);
    h.settle();
    assert!(h.engine.snapshot().is_idle());
    assert_ok!(h.engine.check_io(unit));
}

#[test]
fn bad_requests_are_errors_not_drops() {
    let h = SimHarness::new().online();
    let (p, units) = h.add_port(0x99, &[3]);

    let err = h
        .engine
        .request(ActionKind::ReopenUnit, TargetRef::Adapter)
        .unwrap_err();
    assert!(matches!(err, ErpError::InvalidAction(TargetRef::Adapter)));

    let missing = TargetRef::unit(p, erp_common::UnitId(units[0].0 + 100));
    assert!(matches!(
        h.engine.reopen(missing, 0),
        Err(ErpError::NoSuchTarget(_))
    ));
    assert_err!(h.engine.add_unit(p, Lun(3)));
}

#[test]
fn unit_under_failed_port_is_dropped() {
    let h = SimHarness::new();
    let (port, unit) = online_with_port(&h);

    assert_ok!(h.engine.mark_failed(port));
    let snap = h.engine.snapshot();
    let p = port.port_id().unwrap();
    assert!(snap.port(p).unwrap().status.contains(PortStatus::ERP_FAILED));
    // marking failed reaches the units too
    let u = snap.port(p).unwrap().units[0].status;
    assert!(u.contains(UnitStatus::ERP_FAILED));

    let out = assert_ok!(h.engine.reopen(unit, UnitStatus::ERP_FAILED.bits()));
    assert_eq!(
        out,
        EnqueueOutcome::Dropped {
            reason: DropReason::ParentFailed
        }
    );
    let out = assert_ok!(h.engine.reopen(port, 0));
    assert_eq!(
        out,
        EnqueueOutcome::Dropped {
            reason: DropReason::TargetFailed
        }
    );
}

#[test]
fn stopped_engine_refuses_everything() {
    let mut h = SimHarness::new().online();
    h.engine.stop();
    assert!(matches!(
        h.engine.reopen(TargetRef::Adapter, 0),
        Err(ErpError::WorkerNotRunning)
    ));
    assert!(!h.engine.is_running());
    // waiting on a dead worker returns at once
    h.engine.wait_for_quiescence();
}
