//! Status bitmasks for targets and recovery actions.
//!
//! The common flags share bit positions across adapter, port and unit so a
//! recursive status change on the adapter can be forwarded to descendants
//! with [`common_bits`] masking.

use bitflags::bitflags;

/// Bits shared by all three target kinds.
pub const COMMON_MASK: u32 = 0x0000_ffff;

bitflags! {
    /// Adapter status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct AdapterStatus: u32 {
        const RUNNING = 1 << 0;
        const UNBLOCKED = 1 << 1;
        const OPEN = 1 << 2;
        const OPENING = 1 << 3;
        const CLOSING = 1 << 4;
        const ERP_FAILED = 1 << 5;
        const ERP_INUSE = 1 << 6;

        /// Exchange config reported the host connection is still coming up.
        const HOST_CON_INIT = 1 << 16;
        /// Queued-buffer transport is up.
        const TRANSPORT_UP = 1 << 17;
        /// Exchange config completed successfully.
        const XCONFIG_OK = 1 << 18;
        /// At least one recovery action is queued or running.
        const ERP_PENDING = 1 << 19;
        /// Worker thread is accepting actions.
        const WORKER_UP = 1 << 20;
    }
}

bitflags! {
    /// Port status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct PortStatus: u32 {
        const RUNNING = 1 << 0;
        const UNBLOCKED = 1 << 1;
        const OPEN = 1 << 2;
        const OPENING = 1 << 3;
        const CLOSING = 1 << 4;
        const ERP_FAILED = 1 << 5;
        const ERP_INUSE = 1 << 6;

        /// Well-known directory service port.
        const NAMESERVER = 1 << 16;
        const PHYS_OPEN = 1 << 17;
        /// `d_id` holds a resolved fabric address.
        const DID_VALID = 1 << 18;
        /// The nameserver rejected the WWPN as malformed.
        const WWPN_INVALID = 1 << 19;
    }
}

bitflags! {
    /// Unit status (common flags only).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct UnitStatus: u32 {
        const RUNNING = 1 << 0;
        const UNBLOCKED = 1 << 1;
        const OPEN = 1 << 2;
        const OPENING = 1 << 3;
        const CLOSING = 1 << 4;
        const ERP_FAILED = 1 << 5;
        const ERP_INUSE = 1 << 6;
    }
}

bitflags! {
    /// Flags private to one recovery action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct ActionFlags: u32 {
        /// Tear the target down only; do not reopen it.
        const CLOSE_ONLY = 1 << 0;
        /// Superseded by a stronger action on an ancestor.
        const DISMISSED = 1 << 1;
        /// The last suspension ended because its timer fired.
        const TIMED_OUT = 1 << 2;
        /// The last attempt could not allocate request resources.
        const LOWMEM = 1 << 3;
    }
}

/// Bits of a target-specific mask that are forwarded to descendants.
pub fn common_bits(bits: u32) -> u32 {
    bits & COMMON_MASK
}
