//! Fabric ERP Core Library
//!
//! Error recovery for one storage adapter and the ports and units behind it:
//! - Escalation policy deciding which recovery action a failure needs
//! - Per-target strategy state machines for adapter, port and unit
//! - A completion bridge for hardware answers, timeouts and delays
//! - One worker thread per adapter driving all of the above
//!
//! The binary entry point (`erp-sim`) is in `main.rs`.

pub mod action;
pub mod blocking;
pub mod engine;
pub mod exit_codes;
pub mod hierarchy;
pub mod journal;
pub mod logging;
pub mod queue;
pub mod request;
pub mod services;
pub mod sim;
pub mod snapshot;

mod bridge;
mod followup;
mod policy;
mod state;
mod strategy;
mod worker;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::ErpEngine;
pub use journal::{Cause, DropReason, ErpEvent, ErpEventKind};
pub use policy::EnqueueOutcome;
pub use services::{
    CompletionHandle, DeviceHandle, FabricServices, PortAddress, RequestOutcome, Submitted,
    UnitAddress,
};
pub use snapshot::ErpSnapshot;
