//! Fuzz test for URL parsing
//!
//! Arbitrary bytes must either parse into a locator that respects the size
//! bounds or be rejected, never panic.

#![no_main]

use conduit_core::{MAX_HOST_SIZE, MAX_LOCATION_SIZE, UrlType, parse_url};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for url_type in [UrlType::None, UrlType::Http] {
        if let Ok(url) = parse_url(data, url_type) {
            assert!(!url.host().is_empty() && url.host().len() <= MAX_HOST_SIZE);
            if let Some(location) = url.location() {
                assert!(location.len() <= MAX_LOCATION_SIZE);
            }
            assert_ne!(url.port(), Some(0));
        }
    }
});
