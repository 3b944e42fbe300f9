//! In-process fabric for simulations and tests.
//!
//! `SimFabric` answers every request synchronously from inside the submit
//! call, the way a fast adapter would complete a request before the
//! submitter got around to sleeping. Faults are injected by counters that
//! are consumed as matching requests arrive.
//!
//! ```ignore
//! let sim = Arc::new(SimFabric::new());
//! sim.faults().fail_unit_opens = 2;
//! let engine = ErpEngine::start("adapter0", ErpConfig::fast(), sim.clone())?;
//! sim.attach(engine.completion_handle());
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use erp_common::{DId, Lun, RequestId, SubmitError, Wwpn};
use serde::{Deserialize, Serialize};

use crate::services::{
    CompletionHandle, DeviceHandle, FabricServices, PortAddress, RequestOutcome, Submitted,
    UnitAddress,
};
use crate::state::lock_or_recover;

/// Injected misbehaviour. Counters are decremented as they trigger.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Next N unit opens complete with a device error.
    pub fail_unit_opens: u32,
    /// Next N opens of remote (not well-known) ports complete with a
    /// device error.
    pub fail_port_opens: u32,
    /// Next N physical port closes fail, leaving the port physically open.
    pub fail_physical_closes: u32,
    /// Lookups for these WWPNs report an invalid WWPN.
    pub invalid_wwpns: HashSet<Wwpn>,
    /// Next N nameserver lookups never complete.
    pub timeout_lookups: u32,
    /// Next N submissions of any kind fail with `NoMemory`.
    pub nomem: u32,
    /// Next N exchange-config attempts report the host connection as still
    /// initializing.
    pub host_con_init: u32,
    /// Every exchange config completes with a device error.
    pub fail_exchange_config: bool,
    /// Unit opens are parked until [`SimFabric::release_held`].
    pub hold_unit_opens: bool,
    /// Requests drawn from the low-memory pool.
    pub low_memory_requests: bool,
    pub fail_bring_up: bool,
}

/// One request as the simulated adapter saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "request")]
pub enum SimRequest {
    ExchangeConfig,
    StatusRead,
    OpenPort { wwpn: Wwpn, well_known: bool },
    ClosePort { wwpn: Wwpn, well_known: bool },
    ClosePhysicalPort { wwpn: Wwpn },
    OpenUnit { wwpn: Wwpn, lun: Lun },
    CloseUnit { wwpn: Wwpn, lun: Lun },
    NameserverLookup { wwpn: Wwpn },
}

#[derive(Debug, Default)]
struct SimLog {
    submitted: Vec<(RequestId, SimRequest)>,
    dismissed: Vec<RequestId>,
    registered: Vec<UnitAddress>,
    held: Vec<RequestId>,
    discards: u32,
    transport_up: bool,
    next_device: u64,
}

#[derive(Debug, Default)]
pub struct SimFabric {
    faults: Mutex<SimFaults>,
    log: Mutex<SimLog>,
    handle: Mutex<Option<CompletionHandle>>,
}

impl SimFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: SimFaults) -> Self {
        SimFabric {
            faults: Mutex::new(faults),
            ..Self::default()
        }
    }

    /// Route completions to an engine. Until attached, completions are lost
    /// and requests eventually time out.
    pub fn attach(&self, handle: CompletionHandle) {
        *lock_or_recover(&self.handle) = Some(handle);
    }

    pub fn faults(&self) -> MutexGuard<'_, SimFaults> {
        lock_or_recover(&self.faults)
    }

    fn log(&self) -> MutexGuard<'_, SimLog> {
        lock_or_recover(&self.log)
    }

    fn complete(&self, id: RequestId, outcome: RequestOutcome) {
        let handle = lock_or_recover(&self.handle).clone();
        if let Some(handle) = handle {
            handle.complete_request(id, outcome);
        }
    }

    /// Record `request`, apply the generic faults, then complete it with
    /// whatever `decide` picks. `None` leaves the request outstanding.
    fn submit(
        &self,
        id: RequestId,
        request: SimRequest,
        decide: impl FnOnce(&mut SimFaults) -> Option<RequestOutcome>,
    ) -> Result<Submitted, SubmitError> {
        let (outcome, low_memory) = {
            let mut faults = self.faults();
            if faults.nomem > 0 {
                faults.nomem -= 1;
                return Err(SubmitError::NoMemory);
            }
            (decide(&mut faults), faults.low_memory_requests)
        };
        self.log().submitted.push((id, request));

        if let Some(outcome) = outcome {
            self.complete(id, outcome);
        }
        Ok(Submitted { low_memory })
    }

    /// Every request submitted so far, in order.
    pub fn submitted(&self) -> Vec<(RequestId, SimRequest)> {
        self.log().submitted.clone()
    }

    pub fn count(&self, pred: impl Fn(&SimRequest) -> bool) -> usize {
        self.log().submitted.iter().filter(|(_, r)| pred(r)).count()
    }

    pub fn dismissed(&self) -> Vec<RequestId> {
        self.log().dismissed.clone()
    }

    pub fn registered(&self) -> Vec<UnitAddress> {
        self.log().registered.clone()
    }

    /// Unit opens currently parked.
    pub fn held(&self) -> usize {
        self.log().held.len()
    }

    /// Complete every parked request with `outcome`. Returns how many the
    /// engine accepted.
    pub fn release_held(&self, outcome: RequestOutcome) -> usize {
        let held = std::mem::take(&mut self.log().held);
        held.into_iter()
            .filter(|id| {
                let handle = lock_or_recover(&self.handle).clone();
                handle.is_some_and(|h| h.complete_request(*id, outcome))
            })
            .count()
    }

    /// How often all outstanding requests were discarded by an adapter close.
    pub fn discards(&self) -> u32 {
        self.log().discards
    }

    pub fn transport_up(&self) -> bool {
        self.log().transport_up
    }
}

/// D_ID the simulated directory hands out for `wwpn`.
pub fn sim_d_id(wwpn: Wwpn) -> DId {
    DId::new((wwpn.0 & 0x00ff_ffff) as u32)
}

impl FabricServices for SimFabric {
    fn transport_bring_up(&self) -> Result<(), SubmitError> {
        if self.faults().fail_bring_up {
            return Err(SubmitError::Device("transport refused".to_string()));
        }
        self.log().transport_up = true;
        Ok(())
    }

    fn transport_tear_down(&self) {
        self.log().transport_up = false;
    }

    fn discard_outstanding_requests(&self) {
        let mut log = self.log();
        log.held.clear();
        log.discards += 1;
    }

    fn submit_exchange_config(&self, id: RequestId) -> Result<Submitted, SubmitError> {
        self.submit(id, SimRequest::ExchangeConfig, |f| {
            if f.host_con_init > 0 {
                f.host_con_init -= 1;
                Some(RequestOutcome::HostConnectionInitializing)
            } else if f.fail_exchange_config {
                Some(RequestOutcome::Failed)
            } else {
                Some(RequestOutcome::Success)
            }
        })
    }

    fn submit_status_read(&self, id: RequestId) -> Result<Submitted, SubmitError> {
        // unsolicited buffers only come back with fabric events
        self.submit(id, SimRequest::StatusRead, |_| None)
    }

    fn submit_open_port(
        &self,
        id: RequestId,
        port: &PortAddress,
    ) -> Result<Submitted, SubmitError> {
        let reachable = port.well_known || port.d_id.is_some();
        let request = SimRequest::OpenPort {
            wwpn: port.wwpn,
            well_known: port.well_known,
        };
        let well_known = port.well_known;
        self.submit(id, request, |f| {
            if !reachable {
                Some(RequestOutcome::Failed)
            } else if !well_known && f.fail_port_opens > 0 {
                f.fail_port_opens -= 1;
                Some(RequestOutcome::Failed)
            } else {
                Some(RequestOutcome::Success)
            }
        })
    }

    fn submit_close_port(
        &self,
        id: RequestId,
        port: &PortAddress,
    ) -> Result<Submitted, SubmitError> {
        let request = SimRequest::ClosePort {
            wwpn: port.wwpn,
            well_known: port.well_known,
        };
        self.submit(id, request, |_| Some(RequestOutcome::Success))
    }

    fn submit_close_physical_port(
        &self,
        id: RequestId,
        port: &PortAddress,
    ) -> Result<Submitted, SubmitError> {
        let request = SimRequest::ClosePhysicalPort { wwpn: port.wwpn };
        self.submit(id, request, |f| {
            if f.fail_physical_closes > 0 {
                f.fail_physical_closes -= 1;
                Some(RequestOutcome::Failed)
            } else {
                Some(RequestOutcome::Success)
            }
        })
    }

    fn submit_open_unit(
        &self,
        id: RequestId,
        unit: &UnitAddress,
    ) -> Result<Submitted, SubmitError> {
        let request = SimRequest::OpenUnit {
            wwpn: unit.port.wwpn,
            lun: unit.lun,
        };
        let mut hold = false;
        let result = self.submit(id, request, |f| {
            if f.hold_unit_opens {
                hold = true;
                None
            } else if f.fail_unit_opens > 0 {
                f.fail_unit_opens -= 1;
                Some(RequestOutcome::Failed)
            } else {
                Some(RequestOutcome::Success)
            }
        });
        if hold && result.is_ok() {
            self.log().held.push(id);
        }
        result
    }

    fn submit_close_unit(
        &self,
        id: RequestId,
        unit: &UnitAddress,
    ) -> Result<Submitted, SubmitError> {
        let request = SimRequest::CloseUnit {
            wwpn: unit.port.wwpn,
            lun: unit.lun,
        };
        self.submit(id, request, |_| Some(RequestOutcome::Success))
    }

    fn submit_nameserver_lookup(
        &self,
        id: RequestId,
        wwpn: Wwpn,
    ) -> Result<Submitted, SubmitError> {
        self.submit(id, SimRequest::NameserverLookup { wwpn }, |f| {
            if f.timeout_lookups > 0 {
                f.timeout_lookups -= 1;
                None
            } else if f.invalid_wwpns.contains(&wwpn) {
                Some(RequestOutcome::InvalidWwpn)
            } else {
                Some(RequestOutcome::Resolved {
                    d_id: sim_d_id(wwpn),
                })
            }
        })
    }

    fn dismiss_request(&self, id: RequestId) {
        let mut log = self.log();
        log.held.retain(|held| *held != id);
        log.dismissed.push(id);
    }

    fn register_unit(&self, unit: &UnitAddress) -> Option<DeviceHandle> {
        let mut log = self.log();
        log.registered.push(*unit);
        log.next_device += 1;
        Some(DeviceHandle(log.next_device))
    }
}
