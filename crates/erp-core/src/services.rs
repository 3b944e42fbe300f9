//! Boundary to the collaborators the recovery engine drives.
//!
//! The engine never programs hardware itself. Every step that needs the
//! adapter goes through [`FabricServices`]; every answer comes back through
//! a [`CompletionHandle`] obtained from the engine.

use std::sync::Weak;

use erp_common::{DId, Lun, RequestId, SubmitError, Wwpn};
use serde::{Deserialize, Serialize};

use crate::state::Shared;

/// Result of a successful hand-off to the hardware-request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Submitted {
    /// The request buffer was drawn from the constrained low-memory pool.
    /// A timeout on such a request escalates to an adapter reopen so the
    /// buffer is guaranteed to come back.
    pub low_memory: bool,
}

/// Addressing information for port-level requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAddress {
    pub wwpn: Wwpn,
    pub d_id: Option<DId>,
    /// The port is a well-known fabric service (the nameserver). Open and
    /// close are addressed by role, never by inspecting the WWPN value.
    pub well_known: bool,
}

/// Addressing information for unit-level requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAddress {
    pub port: PortAddress,
    pub lun: Lun,
}

/// Opaque handle the upper layer returns when a unit is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHandle(pub u64);

/// What the hardware-request layer reports when a request finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RequestOutcome {
    /// The request did what it was asked to do.
    Success,
    /// The device reported an error.
    Failed,
    /// Exchange config answered, but the host connection is still coming up.
    HostConnectionInitializing,
    /// Nameserver lookup resolved the WWPN.
    Resolved { d_id: DId },
    /// Nameserver rejected the WWPN as structurally invalid.
    InvalidWwpn,
}

/// Services the engine consumes from the adapter driver.
///
/// Implementations must not call back into the engine synchronously while
/// holding their own locks in a way that could deadlock with
/// [`CompletionHandle::complete_request`]; the engine never holds its own
/// lock while calling any of these methods.
pub trait FabricServices: Send + Sync {
    /// Bring the queued-buffer transport up.
    fn transport_bring_up(&self) -> Result<(), SubmitError>;

    /// Tear the queued-buffer transport down.
    fn transport_tear_down(&self);

    /// Drop every request still outstanding at the adapter. No completion
    /// is delivered for discarded requests.
    fn discard_outstanding_requests(&self);

    fn submit_exchange_config(&self, id: RequestId) -> Result<Submitted, SubmitError>;

    /// Hand one unsolicited status buffer to the adapter.
    fn submit_status_read(&self, id: RequestId) -> Result<Submitted, SubmitError>;

    fn submit_open_port(&self, id: RequestId, port: &PortAddress)
        -> Result<Submitted, SubmitError>;

    fn submit_close_port(&self, id: RequestId, port: &PortAddress)
        -> Result<Submitted, SubmitError>;

    fn submit_close_physical_port(
        &self,
        id: RequestId,
        port: &PortAddress,
    ) -> Result<Submitted, SubmitError>;

    fn submit_open_unit(&self, id: RequestId, unit: &UnitAddress)
        -> Result<Submitted, SubmitError>;

    fn submit_close_unit(&self, id: RequestId, unit: &UnitAddress)
        -> Result<Submitted, SubmitError>;

    fn submit_nameserver_lookup(&self, id: RequestId, wwpn: Wwpn)
        -> Result<Submitted, SubmitError>;

    /// Abandon a request the engine no longer waits for.
    fn dismiss_request(&self, id: RequestId);

    /// Register a unit with the upper (SCSI) layer after its first
    /// successful open.
    fn register_unit(&self, unit: &UnitAddress) -> Option<DeviceHandle>;
}

/// Entry point for the hardware-request layer to report completions.
///
/// Holds only a weak reference to the engine, so a collaborator keeping a
/// handle does not keep a stopped engine alive.
#[derive(Clone)]
pub struct CompletionHandle {
    pub(crate) shared: Weak<Shared>,
}

impl CompletionHandle {
    /// Report that request `id` finished with `outcome`.
    ///
    /// Completions for unknown, dismissed or timed-out requests are ignored.
    /// Returns true if the completion was accepted.
    pub fn complete_request(&self, id: RequestId, outcome: RequestOutcome) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.complete_request(id, outcome),
            None => false,
        }
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("attached", &(self.shared.strong_count() > 0))
            .finish()
    }
}
