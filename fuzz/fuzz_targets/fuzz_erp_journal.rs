//! Fuzz target for journal event decoding.
//!
//! Reports written by erp-sim are read back by tooling; decoding arbitrary
//! JSON must fail cleanly.

#![no_main]

use erp_core::ErpEventKind;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(kind) = serde_json::from_slice::<ErpEventKind>(data) {
        let _ = kind.target();
        let encoded = serde_json::to_vec(&kind).expect("decoded event re-encodes");
        let again: ErpEventKind = serde_json::from_slice(&encoded).expect("re-encoded event decodes");
        assert_eq!(kind, again);
    }
});
