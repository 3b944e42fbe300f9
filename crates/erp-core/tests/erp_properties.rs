//! Property-based tests for the recovery engine.
//!
//! Random request storms from several threads against a simulated fabric
//! with random faults. Whatever the interleaving, every target carries at
//! most one action, and recovery always settles.

use std::collections::HashMap;
use std::thread;

use erp_common::{PortId, TargetRef, UnitId};
use erp_core::sim::SimFaults;
use erp_core::test_utils::SimHarness;
use erp_core::ErpSnapshot;
use proptest::prelude::*;

const PORTS: u64 = 2;
const LUNS: &[u64] = &[0, 1];

#[derive(Debug, Clone, Copy)]
enum Op {
    ReopenUnit(usize, usize),
    NotifyUnit(usize, usize),
    ReopenPort(usize),
    ForcedPort(usize),
    ReopenAdapter,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let port = 0..PORTS as usize;
    let unit = 0..LUNS.len();
    prop_oneof![
        4 => (port.clone(), unit.clone()).prop_map(|(p, u)| Op::ReopenUnit(p, u)),
        3 => (port.clone(), unit).prop_map(|(p, u)| Op::NotifyUnit(p, u)),
        2 => port.clone().prop_map(Op::ReopenPort),
        1 => port.prop_map(Op::ForcedPort),
        1 => Just(Op::ReopenAdapter),
    ]
}

fn faults_strategy() -> impl Strategy<Value = SimFaults> {
    (0u32..3, 0u32..3, 0u32..=3).prop_map(|(nomem, fail_unit_opens, host_con_init)| SimFaults {
        nomem,
        fail_unit_opens,
        host_con_init,
        ..SimFaults::default()
    })
}

struct Fixture {
    h: SimHarness,
    ports: Vec<(PortId, Vec<UnitId>)>,
}

impl Fixture {
    fn new(faults: SimFaults) -> Self {
        let h = SimHarness::with_faults(faults);
        let ports = (1..=PORTS)
            .map(|i| h.add_port(0x5005_0766_0000_0000 + (i << 8), LUNS))
            .collect();
        Fixture { h: h.online(), ports }
    }

    fn apply(&self, op: Op) {
        let engine = &self.h.engine;
        let result = match op {
            Op::ReopenUnit(p, u) => {
                let (port, units) = &self.ports[p];
                engine.reopen(TargetRef::unit(*port, units[u]), 0)
            }
            Op::NotifyUnit(p, u) => {
                let (port, units) = &self.ports[p];
                engine.notify_failure(TargetRef::unit(*port, units[u]))
            }
            Op::ReopenPort(p) => engine.reopen(TargetRef::port(self.ports[p].0), 0),
            Op::ForcedPort(p) => engine.reopen_forced(self.ports[p].0, 0),
            Op::ReopenAdapter => engine.reopen(TargetRef::Adapter, 0),
        };
        // every target exists and every kind fits, so only policy drops
        if let Err(e) = result {
            panic!("{:?} refused: {}", op, e);
        }
    }
}

/// At most one action per target, listed at most once.
fn check_single_action(snap: &ErpSnapshot) -> Result<(), TestCaseError> {
    let mut listed: HashMap<TargetRef, usize> = HashMap::new();
    for target in snap.ready.iter().chain(snap.running.iter()) {
        *listed.entry(*target).or_default() += 1;
    }
    for (target, n) in &listed {
        prop_assert_eq!(*n, 1, "{} listed {} times", target, n);
        let slot = snap.slot(*target);
        prop_assert!(slot.is_some_and(|s| s.action.is_some()), "{} listed without action", target);
    }

    prop_assert!(snap.adapter.erp.refs <= 1);
    for port in &snap.ports {
        prop_assert!(port.erp.refs <= 1, "port {} refs {}", port.id, port.erp.refs);
        for unit in &port.units {
            prop_assert!(unit.erp.refs <= 1, "unit {} refs {}", unit.id, unit.erp.refs);
        }
    }
    Ok(())
}

fn check_settled(snap: &ErpSnapshot) -> Result<(), TestCaseError> {
    prop_assert!(snap.is_idle(), "not idle: {:?}", snap);
    prop_assert_eq!(snap.total_actions, 0);
    prop_assert_eq!(snap.low_memory_actions, 0);
    prop_assert_eq!(snap.adapter.erp.refs, 0);
    for port in &snap.ports {
        prop_assert_eq!(port.erp.refs, 0);
        for unit in &port.units {
            prop_assert_eq!(unit.erp.refs, 0);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Concurrent requests never create a second action for a target.
    #[test]
    fn prop_one_action_per_target(
        streams in prop::collection::vec(prop::collection::vec(op_strategy(), 1..12), 1..4),
    ) {
        let fx = Fixture::new(SimFaults::default());
        thread::scope(|s| {
            for ops in &streams {
                let fx = &fx;
                s.spawn(move || {
                    for op in ops {
                        fx.apply(*op);
                    }
                });
            }
            // sample while the workers run
            for _ in 0..20 {
                let snap = fx.h.engine.snapshot();
                if let Err(e) = check_single_action(&snap) {
                    panic!("{}", e);
                }
                thread::yield_now();
            }
        });
        fx.h.settle();
        check_settled(&fx.h.engine.snapshot())?;
    }

    /// Injected faults delay recovery but never wedge it.
    #[test]
    fn prop_faults_still_settle(
        faults in faults_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..10),
    ) {
        let fx = Fixture::new(faults);
        for op in &ops {
            fx.apply(*op);
            check_single_action(&fx.h.engine.snapshot())?;
        }
        fx.h.settle();
        let snap = fx.h.engine.snapshot();
        check_settled(&snap)?;
        prop_assert_eq!(fx.h.sim.held(), 0);
    }

    /// The journal pairs every enqueue with exactly one dequeue.
    #[test]
    fn prop_journal_balanced(ops in prop::collection::vec(op_strategy(), 1..16)) {
        let fx = Fixture::new(SimFaults::default());
        for op in &ops {
            fx.apply(*op);
        }
        fx.h.settle();

        let mut open: HashMap<TargetRef, i64> = HashMap::new();
        for event in fx.h.engine.events() {
            match event.kind {
                erp_core::ErpEventKind::Enqueued { target, .. } => {
                    let n = open.entry(target).or_default();
                    *n += 1;
                    prop_assert!(*n <= 1, "{} enqueued twice", target);
                }
                erp_core::ErpEventKind::Dequeued { target, .. } => {
                    let n = open.entry(target).or_default();
                    *n -= 1;
                    prop_assert!(*n >= 0, "{} dequeued without enqueue", target);
                }
                _ => {}
            }
        }
        prop_assert!(open.values().all(|n| *n == 0));
    }
}
