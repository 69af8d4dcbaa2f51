//! Buffered transport I/O.
//!
//! Sits between a stream's protocol layer and its raw transport. Reads go
//! through a speculative read-ahead cache so that byte-at-a-time header
//! parsing doesn't turn into one system call per byte:
//!
//! ```text
//!          pos         end
//!           |           |
//!           v           v
//! +---------+-----------+---------+
//! |         |///////////|         |
//! +---------+-----------+---------+
//!            -- read -->
//! ```
//!
//! Once the cached data can't satisfy a request it is moved down to offset
//! 0 and the buffer is refilled from `end`.
//!
//! Writes are assembled into a single transport write. A PKI exchange
//! typically writes a short header followed by a body and then waits for
//! the response; sending those as two small segments makes the peer's
//! delayed ACK stall every message by ~200ms, so both are coalesced.

use conduit_transport::{Transport, TransportError, TransportFlags, TransportResult};
use std::fmt;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Read-ahead cache. Invariant: `pos <= end <= capacity`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ReadAhead {
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
}

impl ReadAhead {
    /// Empty cache of `capacity` bytes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            end: 0,
        }
    }

    /// Buffer capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Read cursor
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// End of cached data
    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Cached bytes not yet returned to the caller
    #[must_use]
    pub fn available(&self) -> usize {
        self.end - self.pos
    }

    /// The cached, unread bytes
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.pos..self.end]
    }

    /// Whole backing store, including bytes already consumed
    #[must_use]
    pub fn storage(&self) -> &[u8] {
        &self.buf
    }

    /// Check the cursor invariant
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.pos <= self.end && self.end <= self.buf.len()
    }
}

// Cursors only, never the cached payload
impl fmt::Debug for ReadAhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadAhead")
            .field("capacity", &self.capacity())
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Write-assembly buffer. Invariant: `end <= capacity`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WriteBuffer {
    buf: Box<[u8]>,
    end: usize,
}

impl WriteBuffer {
    /// Empty buffer of `capacity` bytes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            end: 0,
        }
    }

    /// Buffer capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes waiting to be written
    #[must_use]
    pub fn len(&self) -> usize {
        self.end
    }

    /// Whether nothing is waiting to be written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Bytes waiting to be written
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.end]
    }

    /// Whole backing store
    #[must_use]
    pub fn storage(&self) -> &[u8] {
        &self.buf
    }

    fn append(&mut self, data: &[u8]) {
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
    }

    /// Drop the first `written` bytes after a short transport write
    fn consume(&mut self, written: usize) {
        self.buf.copy_within(written..self.end, 0);
        self.end -= written;
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("capacity", &self.capacity())
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Read exactly `out.len()` bytes through the read-ahead cache.
///
/// Small reads are served from the cache without touching the transport.
/// Otherwise the cache is refilled with one blocking read of at most the
/// requested size followed by one speculative non-blocking read, and any
/// shortfall is read straight into `out`.
///
/// # Errors
///
/// Any transport failure fails the whole read. The contents of `out` are
/// then undefined: part of it may already hold cached data.
pub fn buffered_read(
    cache: &mut ReadAhead,
    transport: &mut dyn Transport,
    out: &mut [u8],
) -> TransportResult<usize> {
    let wanted = out.len();
    let available = cache.available();

    if wanted <= available {
        if wanted == 1 {
            // Header parsers read a byte at a time
            out[0] = cache.buf[cache.pos];
        } else {
            out.copy_from_slice(&cache.buf[cache.pos..cache.pos + wanted]);
        }
        cache.pos += wanted;
        return Ok(wanted);
    }

    if cache.pos > 0 {
        cache.buf.copy_within(cache.pos..cache.end, 0);
        cache.end = available;
        cache.pos = 0;
    }

    let capacity = cache.capacity();
    if cache.end < capacity {
        let to_read = (capacity - cache.end).min(wanted);
        let read = transport.read(
            &mut cache.buf[cache.end..cache.end + to_read],
            TransportFlags::BLOCKING,
        )?;
        cache.end += read;

        if cache.end < capacity {
            // Speculative, a failure here doesn't matter
            match transport.read(&mut cache.buf[cache.end..], TransportFlags::NONBLOCKING) {
                Ok(read) => cache.end += read,
                Err(e) => trace!("Read-ahead top-up failed: {}", e),
            }
        }
    }

    let from_cache = wanted.min(cache.end);
    out[..from_cache].copy_from_slice(&cache.buf[..from_cache]);
    cache.pos = from_cache;
    if from_cache == wanted {
        return Ok(wanted);
    }

    // The cache is drained, the rest has to be read in full or not at all
    let mut filled = from_cache;
    while filled < wanted {
        filled += transport.read(&mut out[filled..], TransportFlags::BLOCKING)?;
    }
    Ok(wanted)
}

/// Write through the assembly buffer.
///
/// Without `flush` the data is only buffered if it fits. Otherwise the
/// buffer is topped up from `data`, sent as one transport write, and any
/// data that didn't fit is written directly.
///
/// Returns how many bytes *of `data`* were accepted. Bytes buffered by an
/// earlier call that are flushed now are never counted.
///
/// # Errors
///
/// Returns the transport error, or `TransportError::Timeout` if the
/// transport accepted nothing.
pub fn buffered_write(
    wbuf: &mut WriteBuffer,
    transport: &mut dyn Transport,
    data: &[u8],
    flush: bool,
) -> TransportResult<usize> {
    if !flush && wbuf.end + data.len() <= wbuf.capacity() {
        wbuf.append(data);
        return Ok(data.len());
    }

    let mut rest = data;
    if !wbuf.is_empty() {
        let to_copy = (wbuf.capacity() - wbuf.end).min(data.len());
        wbuf.append(&data[..to_copy]);

        let written = write_some(transport, wbuf.pending())?;
        if written < wbuf.end {
            let left = wbuf.end - written;
            wbuf.consume(written);
            // Only what came out of `data` counts, never older buffered bytes
            return Ok(to_copy.saturating_sub(left));
        }
        wbuf.end = 0;
        rest = &data[to_copy..];
        if rest.is_empty() {
            return Ok(data.len());
        }
    }

    if rest.is_empty() {
        return Ok(0);
    }
    let written = write_some(transport, rest)?;
    Ok(data.len() - (rest.len() - written))
}

fn write_some(transport: &mut dyn Transport, data: &[u8]) -> TransportResult<usize> {
    match transport.write(data, TransportFlags::NONE)? {
        0 => Err(TransportError::Timeout),
        written => Ok(written.min(data.len())),
    }
}
