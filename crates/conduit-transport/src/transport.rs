//! Transport trait abstraction for the raw transport drivers.
//!
//! This module defines the `Transport` operation set that every substrate
//! (plain sockets, externally managed secure sessions, test doubles) exposes
//! to the stream layer above it: connect, disconnect, read, write, a
//! liveness check and a validity check for caller-supplied sockets.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    Closed,

    /// Operation did not complete within the active timeout
    #[error("Timeout during network I/O")]
    Timeout,

    /// Connection failed
    #[error("Couldn't connect to {host}:{port}: {reason}")]
    ConnectFailed {
        /// Host that was dialled
        host: String,
        /// Port that was dialled
        port: u16,
        /// Underlying failure
        reason: String,
    },

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Name resolution failed
    #[error("Couldn't resolve host '{0}'")]
    Resolve(String),

    /// Operation requires a connected transport
    #[error("Transport is not connected")]
    NotConnected,

    /// A session substrate delivered less than was requested
    #[error("Only read {read} out of {wanted} bytes via session object")]
    PartialRead {
        /// Bytes delivered
        read: usize,
        /// Bytes requested
        wanted: usize,
    },

    /// A session substrate accepted less than it was given
    #[error("Only wrote {written} out of {wanted} bytes via session object")]
    PartialWrite {
        /// Bytes accepted
        written: usize,
        /// Bytes offered
        wanted: usize,
    },

    /// Error reported by an external secure session
    #[error("Session error: {0}")]
    Session(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Per-call transport I/O flags.
///
/// Mirrors the small flag set the stream layer passes down with each read
/// or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportFlags(u8);

impl TransportFlags {
    /// No special handling, use the transport's default behaviour
    pub const NONE: Self = Self(0);
    /// Wait up to the active timeout for at least one byte
    pub const BLOCKING: Self = Self(0b0000_0001);
    /// Return immediately with whatever is pending, possibly nothing
    pub const NONBLOCKING: Self = Self(0b0000_0010);
    /// Force buffered data out to the transport
    pub const FLUSH: Self = Self(0b0000_0100);

    /// Check whether every flag in `other` is set
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Check if the non-blocking flag is set
    #[must_use]
    pub fn is_nonblocking(self) -> bool {
        self.contains(Self::NONBLOCKING)
    }

    /// Check if the flush flag is set
    #[must_use]
    pub fn is_flush(self) -> bool {
        self.contains(Self::FLUSH)
    }

    /// Get the raw flag bits
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for TransportFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Raw transport driver operation set.
///
/// Every connection owns exactly one `Transport`. The stream layer drives it
/// from a single thread; implementations need no internal locking.
///
/// # Examples
///
/// ```no_run
/// use conduit_transport::socket::{SocketKind, SocketTransport};
/// use conduit_transport::transport::{Transport, TransportFlags};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut transport = SocketTransport::client(SocketKind::Stream);
/// transport.connect("example.com", 80, Duration::from_secs(30))?;
///
/// transport.write(b"GET / HTTP/1.0\r\n\r\n", TransportFlags::NONE)?;
/// let mut buf = [0u8; 512];
/// let n = transport.read(&mut buf, TransportFlags::BLOCKING)?;
/// println!("Received {} bytes", n);
/// # Ok(())
/// # }
/// ```
pub trait Transport: Send {
    /// Connect to (or, for a server transport, bind to) `host:port`.
    ///
    /// # Errors
    /// Returns `TransportError` if the connection cannot be established
    /// within `timeout`.
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> TransportResult<()>;

    /// Shut the transport down.
    ///
    /// A full disconnect also closes the connection at the protocol level,
    /// a partial one only releases local state.
    fn disconnect(&mut self, full: bool);

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// A `BLOCKING` read returns at least one byte or an error, a
    /// `NONBLOCKING` read may return `Ok(0)`.
    ///
    /// # Errors
    /// Returns `TransportError::Timeout` if nothing arrived in time and
    /// `TransportError::Closed` on end of stream.
    fn read(&mut self, buf: &mut [u8], flags: TransportFlags) -> TransportResult<usize>;

    /// Write from `buf`, returning the number of bytes accepted.
    ///
    /// # Errors
    /// Returns `TransportError` if the write fails
    fn write(&mut self, buf: &[u8], flags: TransportFlags) -> TransportResult<usize>;

    /// Check that the networking subsystem behind this transport is usable.
    fn is_ok(&self) -> bool;

    /// Validate a caller-supplied socket without performing any I/O.
    ///
    /// # Errors
    /// Returns `TransportError` if the socket is unusable
    fn check(&mut self) -> TransportResult<()>;

    /// Change the timeout applied to subsequent operations.
    fn set_timeout(&mut self, timeout: Duration);

    /// Get the local address, if the transport has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Get the last error message recorded by an external session, if any.
    fn error_message(&self) -> Option<String> {
        None
    }

    /// Get transport statistics.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> TransportResult<()> {
        (**self).connect(host, port, timeout)
    }

    fn disconnect(&mut self, full: bool) {
        (**self).disconnect(full);
    }

    fn read(&mut self, buf: &mut [u8], flags: TransportFlags) -> TransportResult<usize> {
        (**self).read(buf, flags)
    }

    fn write(&mut self, buf: &[u8], flags: TransportFlags) -> TransportResult<usize> {
        (**self).write(buf, flags)
    }

    fn is_ok(&self) -> bool {
        (**self).is_ok()
    }

    fn check(&mut self) -> TransportResult<()> {
        (**self).check()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }

    fn error_message(&self) -> Option<String> {
        (**self).error_message()
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
    /// Number of write calls that reached the transport
    pub writes: u64,
    /// Number of read calls that reached the transport
    pub reads: u64,
    /// Write errors
    pub send_errors: u64,
    /// Read errors
    pub recv_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful write
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.writes += 1;
    }

    /// Record a successful read
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.reads += 1;
    }

    /// Record a write error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    /// Record a read error
    pub fn record_recv_error(&mut self) {
        self.recv_errors += 1;
    }
}
