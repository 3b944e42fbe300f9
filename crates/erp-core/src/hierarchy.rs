//! In-memory model of one adapter, its ports and their units.
//!
//! Ports and units are owned by value in ordered maps keyed by arena id.
//! Every target embeds an [`ErpSlot`] carrying its retry counter, reference
//! count and the one recovery action it may have.

use std::collections::BTreeMap;

use erp_common::{
    AdapterStatus, DId, ErpError, Lun, PortId, PortStatus, Result, TargetRef, UnitId,
    UnitStatus, Wwpn, NAMESERVER_D_ID,
};
use serde::{Deserialize, Serialize};

use crate::action::ErpAction;
use crate::services::{DeviceHandle, PortAddress, UnitAddress};

/// Per-target recovery bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ErpSlot {
    /// Consecutive failed recoveries.
    pub retries: u32,
    /// References held by queued or running actions.
    pub refs: u32,
    pub action: Option<ErpAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Remote,
    Nameserver,
}

#[derive(Debug, Clone, Default)]
pub struct Adapter {
    pub status: AdapterStatus,
    pub erp: ErpSlot,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub wwpn: Wwpn,
    /// Meaningful only while `DID_VALID` is set.
    pub d_id: DId,
    pub role: PortRole,
    pub status: PortStatus,
    pub erp: ErpSlot,
    pub units: BTreeMap<UnitId, Unit>,
}

impl Port {
    pub fn is_nameserver(&self) -> bool {
        self.role == PortRole::Nameserver
    }

    pub fn resolved_d_id(&self) -> Option<DId> {
        self.status
            .contains(PortStatus::DID_VALID)
            .then_some(self.d_id)
    }

    pub fn address(&self) -> PortAddress {
        PortAddress {
            wwpn: self.wwpn,
            d_id: self.resolved_d_id(),
            well_known: self.is_nameserver(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub id: UnitId,
    pub lun: Lun,
    pub status: UnitStatus,
    pub erp: ErpSlot,
    pub device: Option<DeviceHandle>,
}

#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    pub adapter: Adapter,
    ports: BTreeMap<PortId, Port>,
    nameserver: Option<PortId>,
    next_port: u32,
    next_unit: u32,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a remote port. New ports start blocked and not running.
    pub fn add_port(&mut self, wwpn: Wwpn) -> Result<PortId> {
        if self
            .ports
            .values()
            .any(|p| p.role == PortRole::Remote && p.wwpn == wwpn)
        {
            return Err(ErpError::DuplicateWwpn(wwpn));
        }
        Ok(self.insert_port(wwpn, PortRole::Remote))
    }

    pub fn add_unit(&mut self, port: PortId, lun: Lun) -> Result<UnitId> {
        let id = UnitId(self.next_unit + 1);
        let p = self
            .ports
            .get_mut(&port)
            .ok_or(ErpError::NoSuchTarget(TargetRef::port(port)))?;
        if p.is_nameserver() {
            return Err(ErpError::InvalidAction(TargetRef::port(port)));
        }
        if p.units.values().any(|u| u.lun == lun) {
            return Err(ErpError::DuplicateLun { port, lun });
        }
        self.next_unit += 1;
        p.units.insert(
            id,
            Unit {
                id,
                lun,
                status: UnitStatus::empty(),
                erp: ErpSlot::default(),
                device: None,
            },
        );
        Ok(id)
    }

    /// The nameserver port, created on first use.
    pub fn ensure_nameserver(&mut self) -> PortId {
        if let Some(id) = self.nameserver {
            if self.ports.contains_key(&id) {
                return id;
            }
        }
        let id = self.insert_port(Wwpn(0), PortRole::Nameserver);
        if let Some(port) = self.ports.get_mut(&id) {
            port.d_id = NAMESERVER_D_ID;
            port.status = PortStatus::NAMESERVER | PortStatus::DID_VALID;
        }
        self.nameserver = Some(id);
        id
    }

    pub fn nameserver(&self) -> Option<PortId> {
        self.nameserver.filter(|id| self.ports.contains_key(id))
    }

    fn insert_port(&mut self, wwpn: Wwpn, role: PortRole) -> PortId {
        self.next_port += 1;
        let id = PortId(self.next_port);
        self.ports.insert(
            id,
            Port {
                id,
                wwpn,
                d_id: DId(0),
                role,
                status: PortStatus::empty(),
                erp: ErpSlot::default(),
                units: BTreeMap::new(),
            },
        );
        id
    }

    /// Remove a port and its units. Refused while any of them is
    /// referenced by a recovery action.
    pub fn remove_port(&mut self, id: PortId) -> Result<()> {
        let target = TargetRef::port(id);
        let port = self.ports.get(&id).ok_or(ErpError::NoSuchTarget(target))?;
        if port.erp.refs > 0 || port.units.values().any(|u| u.erp.refs > 0) {
            return Err(ErpError::TargetBusy(target));
        }
        self.ports.remove(&id);
        if self.nameserver == Some(id) {
            self.nameserver = None;
        }
        Ok(())
    }

    pub fn remove_unit(&mut self, port: PortId, unit: UnitId) -> Result<()> {
        let target = TargetRef::unit(port, unit);
        let p = self
            .ports
            .get_mut(&port)
            .ok_or(ErpError::NoSuchTarget(target))?;
        let u = p.units.get(&unit).ok_or(ErpError::NoSuchTarget(target))?;
        if u.erp.refs > 0 {
            return Err(ErpError::TargetBusy(target));
        }
        p.units.remove(&unit);
        Ok(())
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    pub fn unit(&self, port: PortId, unit: UnitId) -> Option<&Unit> {
        self.ports.get(&port).and_then(|p| p.units.get(&unit))
    }

    pub fn unit_mut(&mut self, port: PortId, unit: UnitId) -> Option<&mut Unit> {
        self.ports.get_mut(&port).and_then(|p| p.units.get_mut(&unit))
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn port_ids(&self) -> Vec<PortId> {
        self.ports.keys().copied().collect()
    }

    pub fn unit_ids(&self, port: PortId) -> Vec<UnitId> {
        self.ports
            .get(&port)
            .map(|p| p.units.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, target: TargetRef) -> bool {
        match target {
            TargetRef::Adapter => true,
            TargetRef::Port { port } => self.ports.contains_key(&port),
            TargetRef::Unit { port, unit } => self.unit(port, unit).is_some(),
        }
    }

    /// Resolve `target` or report it as unknown.
    pub fn require(&self, target: TargetRef) -> Result<()> {
        if self.contains(target) {
            Ok(())
        } else {
            Err(ErpError::NoSuchTarget(target))
        }
    }

    pub fn slot(&self, target: TargetRef) -> Option<&ErpSlot> {
        match target {
            TargetRef::Adapter => Some(&self.adapter.erp),
            TargetRef::Port { port } => self.ports.get(&port).map(|p| &p.erp),
            TargetRef::Unit { port, unit } => self.unit(port, unit).map(|u| &u.erp),
        }
    }

    pub fn slot_mut(&mut self, target: TargetRef) -> Option<&mut ErpSlot> {
        match target {
            TargetRef::Adapter => Some(&mut self.adapter.erp),
            TargetRef::Port { port } => self.ports.get_mut(&port).map(|p| &mut p.erp),
            TargetRef::Unit { port, unit } => self.unit_mut(port, unit).map(|u| &mut u.erp),
        }
    }

    pub fn action(&self, target: TargetRef) -> Option<&ErpAction> {
        self.slot(target).and_then(|s| s.action.as_ref())
    }

    pub fn action_mut(&mut self, target: TargetRef) -> Option<&mut ErpAction> {
        self.slot_mut(target).and_then(|s| s.action.as_mut())
    }

    /// Raw status bits of `target`; zero for unknown targets.
    pub fn status_bits(&self, target: TargetRef) -> u32 {
        match target {
            TargetRef::Adapter => self.adapter.status.bits(),
            TargetRef::Port { port } => self.ports.get(&port).map_or(0, |p| p.status.bits()),
            TargetRef::Unit { port, unit } => {
                self.unit(port, unit).map_or(0, |u| u.status.bits())
            }
        }
    }

    /// True if every bit of `mask` is set on `target`.
    pub fn has(&self, target: TargetRef, mask: u32) -> bool {
        self.status_bits(target) & mask == mask
    }

    pub fn port_address(&self, port: PortId) -> Option<PortAddress> {
        self.ports.get(&port).map(Port::address)
    }

    pub fn unit_address(&self, port: PortId, unit: UnitId) -> Option<UnitAddress> {
        let p = self.ports.get(&port)?;
        let u = p.units.get(&unit)?;
        Some(UnitAddress {
            port: p.address(),
            lun: u.lun,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_port_rejects_duplicate_wwpn() {
        let mut h = Hierarchy::new();
        let p = h.add_port(Wwpn(0xaa)).unwrap();
        assert_eq!(p, PortId(1));
        assert!(matches!(h.add_port(Wwpn(0xaa)), Err(ErpError::DuplicateWwpn(_))));
    }

    #[test]
    fn test_unit_ids_are_adapter_wide() {
        let mut h = Hierarchy::new();
        let p1 = h.add_port(Wwpn(1)).unwrap();
        let p2 = h.add_port(Wwpn(2)).unwrap();
        let u1 = h.add_unit(p1, Lun(1)).unwrap();
        let u2 = h.add_unit(p2, Lun(1)).unwrap();
        assert_ne!(u1, u2);
        assert!(matches!(
            h.add_unit(p1, Lun(1)),
            Err(ErpError::DuplicateLun { .. })
        ));
    }

    #[test]
    fn test_nameserver_created_once_with_well_known_address() {
        let mut h = Hierarchy::new();
        let ns = h.ensure_nameserver();
        assert_eq!(h.ensure_nameserver(), ns);
        let port = h.port(ns).unwrap();
        assert!(port.is_nameserver());
        assert_eq!(port.resolved_d_id(), Some(NAMESERVER_D_ID));
        assert!(port.address().well_known);
        // a remote port may share the placeholder WWPN of the nameserver
        assert!(h.add_port(Wwpn(0)).is_ok());
    }

    #[test]
    fn test_remove_busy_port_refused() {
        let mut h = Hierarchy::new();
        let p = h.add_port(Wwpn(7)).unwrap();
        let u = h.add_unit(p, Lun(3)).unwrap();
        h.slot_mut(TargetRef::unit(p, u)).unwrap().refs = 1;
        assert!(matches!(h.remove_port(p), Err(ErpError::TargetBusy(_))));
        h.slot_mut(TargetRef::unit(p, u)).unwrap().refs = 0;
        h.remove_port(p).unwrap();
        assert!(!h.contains(TargetRef::port(p)));
    }

    #[test]
    fn test_d_id_hidden_until_resolved() {
        let mut h = Hierarchy::new();
        let p = h.add_port(Wwpn(9)).unwrap();
        let port = h.port_mut(p).unwrap();
        port.d_id = DId(0x010203);
        assert_eq!(port.resolved_d_id(), None);
        port.status.insert(PortStatus::DID_VALID);
        assert_eq!(port.resolved_d_id(), Some(DId(0x010203)));
    }
}
