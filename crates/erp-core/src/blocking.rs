//! Blocking control: gate normal traffic on targets under recovery.
//!
//! Status changes on a target carry the full mask to the target itself and
//! only the common bits to its descendants.

use erp_common::status::common_bits;
use erp_common::{AdapterStatus, PortStatus, TargetRef, UnitStatus};

use crate::hierarchy::{Hierarchy, Port};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOp {
    Set,
    Clear,
}

fn apply_port(port: &mut Port, mask: u32, op: StatusOp, recursive: bool) {
    let own = PortStatus::from_bits_truncate(mask);
    match op {
        StatusOp::Set => port.status.insert(own),
        StatusOp::Clear => port.status.remove(own),
    }
    if recursive {
        let common = UnitStatus::from_bits_truncate(common_bits(mask));
        for unit in port.units.values_mut() {
            match op {
                StatusOp::Set => unit.status.insert(common),
                StatusOp::Clear => unit.status.remove(common),
            }
        }
    }
}

impl Hierarchy {
    /// Change `mask` on `target` only.
    pub fn set_target_status(&mut self, target: TargetRef, mask: u32, op: StatusOp) {
        match target {
            TargetRef::Adapter => {
                let own = AdapterStatus::from_bits_truncate(mask);
                match op {
                    StatusOp::Set => self.adapter.status.insert(own),
                    StatusOp::Clear => self.adapter.status.remove(own),
                }
            }
            TargetRef::Port { port } => {
                if let Some(p) = self.port_mut(port) {
                    apply_port(p, mask, op, false);
                }
            }
            TargetRef::Unit { port, unit } => {
                if let Some(u) = self.unit_mut(port, unit) {
                    let own = UnitStatus::from_bits_truncate(mask);
                    match op {
                        StatusOp::Set => u.status.insert(own),
                        StatusOp::Clear => u.status.remove(own),
                    }
                }
            }
        }
    }

    /// Change `mask` on `target` and the common part of it on every
    /// descendant.
    pub fn modify_status(&mut self, target: TargetRef, mask: u32, op: StatusOp) {
        match target {
            TargetRef::Adapter => {
                self.set_target_status(TargetRef::Adapter, mask, op);
                let common = common_bits(mask);
                for id in self.port_ids() {
                    if let Some(p) = self.port_mut(id) {
                        apply_port(p, common, op, true);
                    }
                }
            }
            TargetRef::Port { port } => {
                if let Some(p) = self.port_mut(port) {
                    apply_port(p, mask, op, true);
                }
            }
            TargetRef::Unit { .. } => self.set_target_status(target, mask, op),
        }
    }

    /// Stop new I/O on `target` and everything beneath it, clearing
    /// `clear_mask` along with `UNBLOCKED`.
    pub fn block(&mut self, target: TargetRef, clear_mask: u32) {
        self.modify_status(
            target,
            UnitStatus::UNBLOCKED.bits() | clear_mask,
            StatusOp::Clear,
        );
    }

    /// Allow I/O on exactly `target`; descendants unblock as their own
    /// recoveries succeed.
    pub fn unblock(&mut self, target: TargetRef) {
        self.set_target_status(target, UnitStatus::UNBLOCKED.bits(), StatusOp::Set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_common::{Lun, Wwpn};

    fn populated() -> (Hierarchy, TargetRef, TargetRef) {
        let mut h = Hierarchy::new();
        let p = h.add_port(Wwpn(0xaa)).unwrap();
        let u = h.add_unit(p, Lun(1)).unwrap();
        let all = (UnitStatus::RUNNING | UnitStatus::UNBLOCKED).bits();
        h.modify_status(TargetRef::Adapter, all, StatusOp::Set);
        (h, TargetRef::port(p), TargetRef::unit(p, u))
    }

    #[test]
    fn test_block_adapter_recurses() {
        let (mut h, port, unit) = populated();
        h.block(TargetRef::Adapter, 0);
        let unblocked = UnitStatus::UNBLOCKED.bits();
        assert!(!h.has(TargetRef::Adapter, unblocked));
        assert!(!h.has(port, unblocked));
        assert!(!h.has(unit, unblocked));
        assert!(h.has(unit, UnitStatus::RUNNING.bits()));
    }

    #[test]
    fn test_unblock_is_exact() {
        let (mut h, port, unit) = populated();
        h.block(port, 0);
        h.unblock(port);
        assert!(h.has(port, UnitStatus::UNBLOCKED.bits()));
        assert!(!h.has(unit, UnitStatus::UNBLOCKED.bits()));
    }

    #[test]
    fn test_specific_bits_stay_on_target() {
        let (mut h, port, _unit) = populated();
        let mask = (AdapterStatus::TRANSPORT_UP | AdapterStatus::RUNNING).bits();
        h.modify_status(TargetRef::Adapter, mask, StatusOp::Set);
        assert!(h.has(TargetRef::Adapter, AdapterStatus::TRANSPORT_UP.bits()));
        // bit 17 means PHYS_OPEN on a port; it must not leak down
        assert!(!h.has(port, PortStatus::PHYS_OPEN.bits()));
    }

    #[test]
    fn test_shutdown_mask_clears_running_recursively() {
        let (mut h, port, unit) = populated();
        h.block(port, (UnitStatus::RUNNING | UnitStatus::ERP_FAILED).bits());
        assert!(!h.has(port, UnitStatus::RUNNING.bits()));
        assert!(!h.has(unit, UnitStatus::RUNNING.bits()));
        assert!(h.has(TargetRef::Adapter, UnitStatus::RUNNING.bits()));
    }
}
