//! Fuzz target for erp.json configuration parsing.
//!
//! Parsing and validation must reject arbitrary input without panicking.

#![no_main]

use erp_config::{validate_config, ErpConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<ErpConfig>(data) {
        if validate_config(&config).is_ok() {
            // accepted configs always yield usable timings
            let _ = config.exchange_config_delay(config.exchange_config_retries);
            assert!(!config.request_timeout().is_zero());
        }
    }
});
