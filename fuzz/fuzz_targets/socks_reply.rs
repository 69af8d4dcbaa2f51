//! Fuzz test for SOCKS5 reply handling
//!
//! Feeds arbitrary proxy replies to the SOCKS handshake.

#![no_main]

use conduit_core::connect_via_socks_proxy;
use conduit_transport::{Transport, TransportError, TransportFlags, TransportResult};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

/// Replays the fuzz input as the proxy's side of the conversation
struct Replay<'a> {
    input: &'a [u8],
}

impl Transport for Replay<'_> {
    fn connect(&mut self, _: &str, _: u16, _: Duration) -> TransportResult<()> {
        Ok(())
    }

    fn disconnect(&mut self, _full: bool) {}

    fn read(&mut self, buf: &mut [u8], _flags: TransportFlags) -> TransportResult<usize> {
        if self.input.is_empty() {
            return Err(TransportError::Closed);
        }
        let n = buf.len().min(self.input.len());
        buf[..n].copy_from_slice(&self.input[..n]);
        self.input = &self.input[n..];
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _flags: TransportFlags) -> TransportResult<usize> {
        Ok(buf.len())
    }

    fn is_ok(&self) -> bool {
        true
    }

    fn check(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) {}
}

fuzz_target!(|data: &[u8]| {
    let mut transport = Replay { input: data };
    let _ = connect_via_socks_proxy(&mut transport, "ca.example.com", 829);
});
