//! Serializable point-in-time view of an engine.

use erp_common::{AdapterStatus, DId, Lun, PortId, PortStatus, TargetRef, UnitId, UnitStatus, Wwpn};
use serde::{Deserialize, Serialize};

use crate::action::ActionSnapshot;
use crate::hierarchy::{ErpSlot, PortRole};
use crate::services::DeviceHandle;
use crate::state::EngineState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub retries: u32,
    pub refs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionSnapshot>,
}

impl From<&ErpSlot> for SlotSnapshot {
    fn from(slot: &ErpSlot) -> Self {
        SlotSnapshot {
            retries: slot.retries,
            refs: slot.refs,
            action: slot.action.as_ref().map(ActionSnapshot::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSnapshot {
    pub status: AdapterStatus,
    pub erp: SlotSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub lun: Lun,
    pub status: UnitStatus,
    pub erp: SlotSnapshot,
    pub device: Option<DeviceHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub id: PortId,
    pub wwpn: Wwpn,
    pub d_id: Option<DId>,
    pub role: PortRole,
    pub status: PortStatus,
    pub erp: SlotSnapshot,
    pub units: Vec<UnitSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpSnapshot {
    pub adapter: AdapterSnapshot,
    pub ports: Vec<PortSnapshot>,
    pub ready: Vec<TargetRef>,
    pub running: Vec<TargetRef>,
    pub outstanding_requests: usize,
    pub total_actions: u32,
    pub low_memory_actions: u32,
    pub events_recorded: u64,
}

impl ErpSnapshot {
    pub(crate) fn capture(st: &EngineState) -> Self {
        let h = &st.hierarchy;
        let ports = h
            .ports()
            .map(|p| PortSnapshot {
                id: p.id,
                wwpn: p.wwpn,
                d_id: p.resolved_d_id(),
                role: p.role,
                status: p.status,
                erp: SlotSnapshot::from(&p.erp),
                units: p
                    .units
                    .values()
                    .map(|u| UnitSnapshot {
                        id: u.id,
                        lun: u.lun,
                        status: u.status,
                        erp: SlotSnapshot::from(&u.erp),
                        device: u.device,
                    })
                    .collect(),
            })
            .collect();

        ErpSnapshot {
            adapter: AdapterSnapshot {
                status: h.adapter.status,
                erp: SlotSnapshot::from(&h.adapter.erp),
            },
            ports,
            ready: st.queue.ready().copied().collect(),
            running: st.queue.running().copied().collect(),
            outstanding_requests: st.requests.len(),
            total_actions: st.counters.total,
            low_memory_actions: st.counters.low_mem,
            events_recorded: st.journal.recorded(),
        }
    }

    pub fn port(&self, id: PortId) -> Option<&PortSnapshot> {
        self.ports.iter().find(|p| p.id == id)
    }

    pub fn unit(&self, port: PortId, unit: UnitId) -> Option<&UnitSnapshot> {
        self.port(port)?.units.iter().find(|u| u.id == unit)
    }

    pub fn nameserver(&self) -> Option<&PortSnapshot> {
        self.ports.iter().find(|p| p.role == PortRole::Nameserver)
    }

    /// Slot of `target`, if it exists.
    pub fn slot(&self, target: TargetRef) -> Option<&SlotSnapshot> {
        match target {
            TargetRef::Adapter => Some(&self.adapter.erp),
            TargetRef::Port { port } => self.port(port).map(|p| &p.erp),
            TargetRef::Unit { port, unit } => self.unit(port, unit).map(|u| &u.erp),
        }
    }

    /// True when no action is queued, running or holding a reference.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
            && self.running.is_empty()
            && self.adapter.erp.refs == 0
            && self
                .ports
                .iter()
                .all(|p| p.erp.refs == 0 && p.units.iter().all(|u| u.erp.refs == 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogContext;
    use erp_config::ErpConfig;

    #[test]
    fn test_capture_lists_targets() {
        let mut st = EngineState::new(ErpConfig::default(), LogContext::new("run-test", "a0"));
        let p = st.hierarchy.add_port(Wwpn(0xabc)).unwrap();
        let u = st.hierarchy.add_unit(p, Lun(7)).unwrap();
        st.hierarchy.ensure_nameserver();

        let snap = ErpSnapshot::capture(&st);
        assert_eq!(snap.ports.len(), 2);
        assert_eq!(snap.unit(p, u).unwrap().lun, Lun(7));
        assert!(snap.nameserver().is_some());
        assert!(snap.port(p).unwrap().d_id.is_none());
        assert!(snap.is_idle());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["ports"][0]["role"], "remote");
        assert!(json["adapter"]["erp"].get("action").is_none());
    }
}
