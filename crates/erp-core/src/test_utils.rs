//! Test utilities for erp-core.
//!
//! - Common assertions
//! - An engine wired to a [`SimFabric`] with helpers to bring targets up
//!   and wait for recovery to settle

use std::sync::Arc;
use std::time::{Duration, Instant};

use erp_common::{Lun, PortId, TargetRef, UnitId, Wwpn};
use erp_config::ErpConfig;

use crate::engine::ErpEngine;
use crate::journal::{ErpEvent, ErpEventKind};
use crate::sim::{SimFabric, SimFaults};

/// Assert that a Result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($expr:expr, $msg:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Assert that a Result is Err.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(val) => panic!("Expected Err, got Ok: {:?}", val),
            Err(_) => {}
        }
    };
    ($expr:expr, $msg:expr) => {
        match $expr {
            Ok(val) => panic!("{}: got Ok({:?})", $msg, val),
            Err(_) => {}
        }
    };
}

/// Upper bound for any single recovery to settle under test timings.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast timings with a journal large enough to keep a whole test run.
pub fn test_config() -> ErpConfig {
    ErpConfig {
        event_history: 16_384,
        ..ErpConfig::fast()
    }
}

/// An engine over a simulated fabric.
pub struct SimHarness {
    pub engine: ErpEngine,
    pub sim: Arc<SimFabric>,
}

impl SimHarness {
    pub fn new() -> Self {
        Self::with(test_config(), SimFaults::default())
    }

    pub fn with_faults(faults: SimFaults) -> Self {
        Self::with(test_config(), faults)
    }

    pub fn with(config: ErpConfig, faults: SimFaults) -> Self {
        let sim = Arc::new(SimFabric::with_faults(faults));
        let engine = match ErpEngine::start("adapter0", config, sim.clone()) {
            Ok(engine) => engine,
            Err(e) => panic!("engine failed to start: {}", e),
        };
        sim.attach(engine.completion_handle());
        SimHarness { engine, sim }
    }

    /// Bring the adapter up and wait for it to settle.
    pub fn online(self) -> Self {
        crate::assert_ok!(self.engine.set_online(TargetRef::Adapter));
        self.settle();
        self
    }

    /// Add a port with `luns` beneath it, without recovering anything.
    pub fn add_port(&self, wwpn: u64, luns: &[u64]) -> (PortId, Vec<UnitId>) {
        let port = crate::assert_ok!(self.engine.add_port(Wwpn(wwpn)));
        let units = luns
            .iter()
            .map(|lun| crate::assert_ok!(self.engine.add_unit(port, Lun(*lun))))
            .collect();
        (port, units)
    }

    /// Wait for recovery to settle; panics after [`SETTLE_TIMEOUT`].
    pub fn settle(&self) {
        if !self.engine.wait_for_quiescence_timeout(SETTLE_TIMEOUT) {
            panic!(
                "recovery did not settle: {}",
                serde_json::to_string_pretty(&self.engine.snapshot()).unwrap_or_default()
            );
        }
    }

    /// Journal entries matching `pred`.
    pub fn events_where(&self, pred: impl Fn(&ErpEventKind) -> bool) -> Vec<ErpEvent> {
        self.engine
            .events()
            .into_iter()
            .filter(|e| pred(&e.kind))
            .collect()
    }
}

impl Default for SimHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `cond` until it holds or `timeout` passes. Returns the final value.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_ok_returns_value() {
        let value: Result<u32, String> = Ok(42);
        assert_eq!(assert_ok!(value), 42);
    }

    #[test]
    #[should_panic(expected = "Expected Ok")]
    fn test_assert_ok_panics_on_err() {
        let value: Result<u32, String> = Err("boom".into());
        assert_ok!(value);
    }

    #[test]
    fn test_assert_err_accepts_err() {
        let value: Result<u32, String> = Err("boom".into());
        assert_err!(value);
    }

    #[test]
    fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(10), || false));
        assert!(wait_until(Duration::from_millis(10), || true));
    }

    #[test]
    fn test_harness_brings_adapter_online() {
        let h = SimHarness::new().online();
        assert!(h.sim.transport_up());
        assert!(h.engine.check_io(TargetRef::Adapter).is_ok());
    }
}
