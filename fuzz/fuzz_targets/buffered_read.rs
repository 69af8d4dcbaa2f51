//! Fuzz test for the read-ahead engine
//!
//! Arbitrary transport chunkings, cache capacities and request sizes must
//! always reassemble the delivered bytes in order.

#![no_main]

use arbitrary::Arbitrary;
use conduit_core::{ReadAhead, buffered_read};
use conduit_transport::{Transport, TransportError, TransportFlags, TransportResult};
use libfuzzer_sys::fuzz_target;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Arbitrary)]
struct ReadPlan {
    data: Vec<u8>,
    chunk_sizes: Vec<u8>,
    request_sizes: Vec<u8>,
    capacity: u16,
}

struct Chunked {
    chunks: VecDeque<Vec<u8>>,
}

impl Transport for Chunked {
    fn connect(&mut self, _: &str, _: u16, _: Duration) -> TransportResult<()> {
        Ok(())
    }

    fn disconnect(&mut self, _full: bool) {}

    fn read(&mut self, buf: &mut [u8], flags: TransportFlags) -> TransportResult<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return if flags.is_nonblocking() {
                Ok(0)
            } else {
                Err(TransportError::Closed)
            };
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.push_front(chunk.split_off(n));
        }
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

fn split(data: &[u8], sizes: &[u8]) -> Vec<Vec<u8>> {
    let mut pieces = Vec::new();
    let mut rest = data;
    for &size in sizes.iter().chain(std::iter::once(&u8::MAX)).cycle() {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(usize::from(size.max(1)).min(rest.len()));
        pieces.push(head.to_vec());
        rest = tail;
    }
    pieces
}

fuzz_target!(|plan: ReadPlan| {
    let mut transport = Chunked {
        chunks: split(&plan.data, &plan.chunk_sizes).into(),
    };
    let mut cache = ReadAhead::new(usize::from(plan.capacity.max(1)));

    let mut received = Vec::new();
    for request in split(&plan.data, &plan.request_sizes) {
        let mut out = vec![0u8; request.len()];
        buffered_read(&mut cache, &mut transport, &mut out).unwrap();
        assert!(cache.is_consistent());
        received.extend_from_slice(&out);
    }
    assert_eq!(received, plan.data);
});
