//! Fuzz target for the recovery engine.
//!
//! Drives one engine over a simulated fabric with an arbitrary mix of
//! recovery requests and injected faults. The engine must never panic,
//! never hold two actions for one target, and always settle.

#![no_main]

use std::sync::Arc;
use std::time::Duration;

use arbitrary::Arbitrary;
use erp_common::{Lun, PortId, TargetRef, UnitId, UnitStatus, Wwpn};
use erp_config::ErpConfig;
use erp_core::sim::{SimFabric, SimFaults};
use erp_core::ErpEngine;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    ReopenUnit { port: u8, unit: u8, clear_failed: bool },
    ReopenPort { port: u8, clear_failed: bool },
    ForcedPort { port: u8 },
    ReopenAdapter,
    ShutdownPort { port: u8 },
    SetOnline { port: u8 },
    Block { port: u8 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    ports: u8,
    luns: u8,
    nomem: u8,
    fail_unit_opens: u8,
    host_con_init: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let faults = SimFaults {
        nomem: u32::from(input.nomem % 4),
        fail_unit_opens: u32::from(input.fail_unit_opens % 4),
        host_con_init: u32::from(input.host_con_init % 3),
        ..SimFaults::default()
    };
    let sim = Arc::new(SimFabric::with_faults(faults));
    let Ok(mut engine) = ErpEngine::start("fuzz0", ErpConfig::fast(), sim.clone()) else {
        return;
    };
    sim.attach(engine.completion_handle());

    let mut topology: Vec<(PortId, Vec<UnitId>)> = Vec::new();
    for p in 0..(input.ports % 4) {
        let Ok(port) = engine.add_port(Wwpn(0x5005_0766_0000_0000 + (u64::from(p) << 8))) else {
            return;
        };
        let units = (0..(input.luns % 4))
            .filter_map(|lun| engine.add_unit(port, Lun(u64::from(lun))).ok())
            .collect();
        topology.push((port, units));
    }
    let _ = engine.set_online(TargetRef::Adapter);

    let port_at = |i: u8| topology.get(usize::from(i) % topology.len().max(1));
    for op in input.ops.iter().take(64) {
        let result = match *op {
            Op::ReopenAdapter => engine.reopen(TargetRef::Adapter, 0),
            Op::ReopenUnit { port, unit, clear_failed } => {
                let Some((p, units)) = port_at(port) else { continue };
                let Some(u) = units.get(usize::from(unit) % units.len().max(1)) else {
                    continue;
                };
                let mask = if clear_failed { UnitStatus::ERP_FAILED.bits() } else { 0 };
                engine.reopen(TargetRef::unit(*p, *u), mask)
            }
            Op::ReopenPort { port, clear_failed } => {
                let Some((p, _)) = port_at(port) else { continue };
                let mask = if clear_failed { UnitStatus::ERP_FAILED.bits() } else { 0 };
                engine.reopen(TargetRef::port(*p), mask)
            }
            Op::ForcedPort { port } => {
                let Some((p, _)) = port_at(port) else { continue };
                engine.reopen_forced(*p, 0)
            }
            Op::ShutdownPort { port } => {
                let Some((p, _)) = port_at(port) else { continue };
                engine.shutdown(TargetRef::port(*p), 0)
            }
            Op::SetOnline { port } => {
                let Some((p, _)) = port_at(port) else { continue };
                engine.set_online(TargetRef::port(*p))
            }
            Op::Block { port } => {
                let Some((p, _)) = port_at(port) else { continue };
                let _ = engine.block(TargetRef::port(*p), 0);
                continue;
            }
        };
        assert!(result.is_ok(), "{:?} refused: {:?}", op, result);

        let snap = engine.snapshot();
        let mut listed: Vec<TargetRef> = snap.ready.iter().chain(snap.running.iter()).copied().collect();
        let before = listed.len();
        listed.sort();
        listed.dedup();
        assert_eq!(before, listed.len(), "target listed twice");
    }

    assert!(
        engine.wait_for_quiescence_timeout(Duration::from_secs(30)),
        "recovery did not settle: {:?}",
        engine.snapshot()
    );
    assert!(engine.snapshot().is_idle());
    engine.stop();
});
