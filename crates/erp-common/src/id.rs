//! Fabric identity and target addressing types.
//!
//! Ports and units live in an arena owned by the engine; everything else
//! (actions, queues, request bookkeeping) refers to them through the small
//! copyable ids defined here and resolves them at run time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Worldwide port name: opaque 64-bit identity of a remote fabric port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wwpn(pub u64);

impl fmt::Display for Wwpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<u64> for Wwpn {
    fn from(value: u64) -> Self {
        Wwpn(value)
    }
}

/// Logical unit number behind a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lun(pub u64);

impl fmt::Display for Lun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<u64> for Lun {
    fn from(value: u64) -> Self {
        Lun(value)
    }
}

/// 24-bit fabric address resolved through the nameserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DId(pub u32);

impl DId {
    /// Mask an arbitrary value down to the 24 address bits.
    pub fn new(raw: u32) -> Self {
        DId(raw & 0x00ff_ffff)
    }
}

impl fmt::Display for DId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}", self.0)
    }
}

/// Arena id of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Arena id of a unit. Unique across the whole adapter, not just its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Id the engine allocates for every hardware request it submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Address of a recoverable target in the adapter hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TargetRef {
    Adapter,
    Port { port: PortId },
    Unit { port: PortId, unit: UnitId },
}

impl TargetRef {
    pub fn port(port: PortId) -> Self {
        TargetRef::Port { port }
    }

    pub fn unit(port: PortId, unit: UnitId) -> Self {
        TargetRef::Unit { port, unit }
    }

    /// Port this target lives under, if any.
    pub fn port_id(&self) -> Option<PortId> {
        match self {
            TargetRef::Adapter => None,
            TargetRef::Port { port } | TargetRef::Unit { port, .. } => Some(*port),
        }
    }

    /// Returns true if `self` is `other` or lies beneath it.
    pub fn is_within(&self, other: &TargetRef) -> bool {
        match (other, self) {
            (TargetRef::Adapter, _) => true,
            (TargetRef::Port { port: a }, TargetRef::Port { port: b }) => a == b,
            (TargetRef::Port { port: a }, TargetRef::Unit { port: b, .. }) => a == b,
            (TargetRef::Unit { unit: a, .. }, TargetRef::Unit { unit: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Adapter => write!(f, "adapter"),
            TargetRef::Port { port } => write!(f, "{}", port),
            TargetRef::Unit { port, unit } => write!(f, "{}/{}", port, unit),
        }
    }
}

/// Kind of recovery action, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ReopenUnit,
    ReopenPort,
    ReopenPortForced,
    ReopenAdapter,
}

impl ActionKind {
    /// Target this kind of action would operate on, derived from a request target.
    ///
    /// Returns `None` when the kind does not fit the target (e.g. a port
    /// action addressed at the adapter).
    pub fn target_for(self, target: TargetRef) -> Option<TargetRef> {
        match (self, target) {
            (ActionKind::ReopenAdapter, _) => Some(TargetRef::Adapter),
            (ActionKind::ReopenPort | ActionKind::ReopenPortForced, t) => {
                t.port_id().map(TargetRef::port)
            }
            (ActionKind::ReopenUnit, t @ TargetRef::Unit { .. }) => Some(t),
            (ActionKind::ReopenUnit, _) => None,
        }
    }

    /// Natural kind for a plain reopen of `target`.
    pub fn for_target(target: TargetRef) -> Self {
        match target {
            TargetRef::Adapter => ActionKind::ReopenAdapter,
            TargetRef::Port { .. } => ActionKind::ReopenPort,
            TargetRef::Unit { .. } => ActionKind::ReopenUnit,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::ReopenUnit => write!(f, "reopen_unit"),
            ActionKind::ReopenPort => write!(f, "reopen_port"),
            ActionKind::ReopenPortForced => write!(f, "reopen_port_forced"),
            ActionKind::ReopenAdapter => write!(f, "reopen_adapter"),
        }
    }
}
