//! Fuzz test for configuration file parsing
//!
//! Tests that arbitrary TOML input doesn't cause panics or crashes when
//! parsed and validated as CONDUIT network configuration.

#![no_main]

use conduit_core::NetConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Invalid configs fail, but shouldn't panic
        if let Ok(config) = toml::from_str::<NetConfig>(s) {
            if config.validate().is_ok() {
                assert!(config.buffer_size > 0);
                let _ = config.connect_timeout();
                let _ = config.http_proxy();
            }
        }
    }
});
