//! Bookkeeping for hardware requests the engine has handed out.

use std::collections::HashMap;

use erp_common::{PortId, RequestId, TargetRef, UnitId};
use serde::{Deserialize, Serialize};

/// What an outstanding request asks the adapter to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "request")]
pub enum RequestKind {
    ExchangeConfig,
    StatusRead,
    OpenPort { port: PortId },
    ClosePort { port: PortId },
    ClosePhysicalPort { port: PortId },
    OpenUnit { port: PortId, unit: UnitId },
    CloseUnit { port: PortId, unit: UnitId },
    NameserverLookup { port: PortId },
}

impl RequestKind {
    /// Target whose status the completion updates.
    pub fn target(&self) -> TargetRef {
        match *self {
            RequestKind::ExchangeConfig | RequestKind::StatusRead => TargetRef::Adapter,
            RequestKind::OpenPort { port }
            | RequestKind::ClosePort { port }
            | RequestKind::ClosePhysicalPort { port }
            | RequestKind::NameserverLookup { port } => TargetRef::port(port),
            RequestKind::OpenUnit { port, unit } | RequestKind::CloseUnit { port, unit } => {
                TargetRef::unit(port, unit)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::ExchangeConfig => "exchange_config",
            RequestKind::StatusRead => "status_read",
            RequestKind::OpenPort { .. } => "open_port",
            RequestKind::ClosePort { .. } => "close_port",
            RequestKind::ClosePhysicalPort { .. } => "close_physical_port",
            RequestKind::OpenUnit { .. } => "open_unit",
            RequestKind::CloseUnit { .. } => "close_unit",
            RequestKind::NameserverLookup { .. } => "nameserver_lookup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub kind: RequestKind,
    /// Action waiting on this request; `None` for unsolicited status reads.
    pub owner: Option<TargetRef>,
    pub low_memory: bool,
}

#[derive(Debug, Default)]
pub struct RequestTable {
    next_id: u64,
    records: HashMap<RequestId, RequestRecord>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: RequestKind, owner: Option<TargetRef>) -> RequestId {
        self.next_id += 1;
        let id = RequestId(self.next_id);
        self.records.insert(
            id,
            RequestRecord {
                kind,
                owner,
                low_memory: false,
            },
        );
        id
    }

    pub fn mark_low_memory(&mut self, id: RequestId) {
        if let Some(r) = self.records.get_mut(&id) {
            r.low_memory = true;
        }
    }

    pub fn take(&mut self, id: RequestId) -> Option<RequestRecord> {
        self.records.remove(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<&RequestRecord> {
        self.records.get(&id)
    }

    /// Forget every outstanding request (adapter close).
    pub fn clear(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
