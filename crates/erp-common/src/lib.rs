//! Fabric ERP common types, identifiers, and errors.
//!
//! This crate provides foundational types shared across the ERP crates:
//! - Fabric identifiers (WWPN, LUN, D_ID) and arena target ids
//! - Status bitmasks for adapters, ports, units and recovery actions
//! - The unified error type with stable codes and categories

pub mod error;
pub mod id;
pub mod status;

pub use error::{ErpError, ErrorCategory, Result, SubmitError};
pub use id::{ActionKind, DId, Lun, PortId, RequestId, TargetRef, UnitId, Wwpn};
pub use status::{ActionFlags, AdapterStatus, PortStatus, UnitStatus};

/// Well-known fabric address of the directory (nameserver) service.
pub const NAMESERVER_D_ID: DId = DId(0x00ff_fffc);
