//! Connection descriptor.
//!
//! One descriptor per open or opening stream. It records the endpoint,
//! role, timeouts, selected layering and the substrate handle, and owns the
//! write-assembly buffer of buffered streams. Everything that could identify
//! the peer is wiped when the descriptor goes away.

use crate::buffered::WriteBuffer;
use crate::error::{ErrorInfo, NetError, NetResult};
use crate::layer::{StreamLayer, Substrate};
use crate::{
    MAX_BUFFER_SIZE, MAX_HOST_SIZE, MAX_LOCATION_SIZE, MAX_NETWORK_TIMEOUT, MIN_HOST_SIZE,
    MIN_LOCATION_SIZE, UNBOUNDED_TIMEOUT,
};
use conduit_transport::Transport;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};
use zeroize::Zeroize;

/// Stream protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain TCP
    Tcp,
    /// UDP datagrams
    Udp,
    /// HTTP over TCP
    Http,
}

impl Protocol {
    /// Protocol name as used on the command line and in logs
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "http" => Ok(Self::Http),
            _ => Err(NetError::BadData(format!("Unknown protocol: {s}"))),
        }
    }
}

/// Stream role flags, set once when the connection is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetFlags(u8);

impl NetFlags {
    /// Listening stream
    pub const IS_SERVER: u8 = 0b0000_0001;
    /// Datagram stream
    pub const DGRAM: u8 = 0b0000_0010;
    /// Socket supplied by the caller, never shut down here
    pub const USER_SOCKET: u8 = 0b0000_0100;
    /// Routed through an HTTP proxy
    pub const HTTP_PROXY: u8 = 0b0000_1000;
    /// Routed through an HTTP proxy on explicit request
    pub const HTTP_TUNNEL: u8 = 0b0001_0000;

    const ALL: u8 = 0b0001_1111;

    /// Create new empty flags
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Set the given flag bits
    #[must_use]
    pub fn with(mut self, bits: u8) -> Self {
        self.0 |= bits;
        self
    }

    /// Check whether all of `bits` are set
    #[must_use]
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    /// Check if this is a listening stream
    #[must_use]
    pub fn is_server(self) -> bool {
        self.contains(Self::IS_SERVER)
    }

    /// Check if this is a datagram stream
    #[must_use]
    pub fn is_datagram(self) -> bool {
        self.contains(Self::DGRAM)
    }

    /// Check if the socket belongs to the caller
    #[must_use]
    pub fn is_user_socket(self) -> bool {
        self.contains(Self::USER_SOCKET)
    }

    /// Check if the stream goes through an HTTP proxy of either kind
    #[must_use]
    pub fn is_proxied(self) -> bool {
        self.0 & (Self::HTTP_PROXY | Self::HTTP_TUNNEL) != 0
    }

    /// Raw flag bits
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Peer implementation, used only to work around known-buggy peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerType {
    /// Nothing known about the peer
    #[default]
    Unknown,
    /// Microsoft server stack
    Microsoft,
    /// Apache httpd
    Apache,
    /// Identified, but needs no special handling
    Other,
}

/// Connection descriptor for one network stream
pub struct NetDescriptor {
    protocol: Protocol,
    flags: NetFlags,
    host: Vec<u8>,
    path: Vec<u8>,
    port: u16,
    peer_type: PeerType,
    timeout: Duration,
    saved_timeout: Duration,
    layer: StreamLayer,
    transport: Box<dyn Transport>,
    write_buffer: Option<WriteBuffer>,
    error: ErrorInfo,
    connected: bool,
    released: bool,
}

impl NetDescriptor {
    /// Create a descriptor with no endpoint, zero timeouts and no buffers
    #[must_use]
    pub fn new(
        protocol: Protocol,
        flags: NetFlags,
        layer: StreamLayer,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            protocol,
            flags,
            host: Vec::new(),
            path: Vec::new(),
            port: 0,
            peer_type: PeerType::Unknown,
            timeout: Duration::ZERO,
            saved_timeout: Duration::ZERO,
            layer,
            transport,
            write_buffer: None,
            error: ErrorInfo::new(),
            connected: false,
            released: false,
        }
    }

    /// Record the endpoint. `path` is the URL location, query included.
    pub fn set_endpoint(&mut self, host: &str, path: Option<&str>, port: u16) {
        self.host.zeroize();
        self.path.zeroize();
        self.host.extend_from_slice(host.as_bytes());
        if let Some(path) = path {
            self.path.extend_from_slice(path.as_bytes());
        }
        self.port = port;
    }

    /// Set the connect-phase and data-phase timeouts
    pub fn set_timeouts(&mut self, timeout: Duration, saved_timeout: Duration) {
        self.timeout = timeout;
        self.saved_timeout = saved_timeout;
    }

    /// Give the stream a write-assembly buffer
    pub fn attach_write_buffer(&mut self, capacity: usize) {
        self.write_buffer = Some(WriteBuffer::new(capacity));
    }

    /// Stream protocol
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Role flags
    #[must_use]
    pub fn flags(&self) -> NetFlags {
        self.flags
    }

    /// Host or bind interface, empty if none
    #[must_use]
    pub fn host(&self) -> &str {
        std::str::from_utf8(&self.host).unwrap_or_default()
    }

    /// Location part of the URL, if any
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        if self.path.is_empty() {
            None
        } else {
            std::str::from_utf8(&self.path).ok()
        }
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Peer classification
    #[must_use]
    pub fn peer_type(&self) -> PeerType {
        self.peer_type
    }

    /// Record the peer classification
    pub fn set_peer_type(&mut self, peer_type: PeerType) {
        self.peer_type = peer_type;
    }

    /// Currently active timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Data-phase timeout, active once connected
    #[must_use]
    pub fn saved_timeout(&self) -> Duration {
        self.saved_timeout
    }

    /// Selected layering
    #[must_use]
    pub fn layer(&self) -> StreamLayer {
        self.layer
    }

    /// Substrate handle
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Substrate handle, mutable
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Substrate handle together with the write buffer, for buffered writes
    pub fn io_parts(&mut self) -> (&mut dyn Transport, Option<&mut WriteBuffer>) {
        (self.transport.as_mut(), self.write_buffer.as_mut())
    }

    /// Write-assembly buffer, if the stream is buffered
    #[must_use]
    pub fn write_buffer(&self) -> Option<&WriteBuffer> {
        self.write_buffer.as_ref()
    }

    /// Last recorded error
    #[must_use]
    pub fn error(&self) -> &ErrorInfo {
        &self.error
    }

    /// Last recorded error, mutable
    pub fn error_mut(&mut self) -> &mut ErrorInfo {
        &mut self.error
    }

    /// Whether the connection has been established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Mark the connection established and switch to the data-phase timeout
    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.timeout = self.saved_timeout;
        self.transport.set_timeout(self.saved_timeout);
    }

    /// Verify every descriptor invariant.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Internal` naming the first violated invariant.
    pub fn sanity_check(&self) -> NetResult<()> {
        let result = self.check_invariants();
        if let Err(what) = result {
            error!("Network stream sanity check failed: {}", what);
            return Err(NetError::Internal(format!("network stream {what}")));
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), &'static str> {
        let flags = self.flags;
        if flags.bits() & !NetFlags::ALL != 0
            || flags.is_datagram() != (self.protocol == Protocol::Udp)
            || (flags.is_proxied() && self.protocol != Protocol::Http)
            || flags.contains(NetFlags::HTTP_PROXY | NetFlags::HTTP_TUNNEL)
        {
            return Err("flags");
        }

        if self.timeout > MAX_NETWORK_TIMEOUT
            && !(flags.is_server() && self.timeout == UNBOUNDED_TIMEOUT)
        {
            return Err("timeout");
        }
        if self.saved_timeout > MAX_NETWORK_TIMEOUT {
            return Err("saved timeout");
        }

        if !self.host.is_empty()
            && (self.host.len() < MIN_HOST_SIZE || self.host.len() > MAX_HOST_SIZE)
        {
            return Err("host");
        }
        if !self.path.is_empty()
            && (self.path.len() < MIN_LOCATION_SIZE || self.path.len() > MAX_LOCATION_SIZE)
        {
            return Err("path");
        }
        let external = flags.is_user_socket() || self.layer.substrate == Substrate::Session;
        if !external && !flags.is_server() && (self.port == 0 || self.host.is_empty()) {
            return Err("endpoint");
        }

        match &self.write_buffer {
            None if self.layer.is_buffered() => Err("missing write buffer"),
            Some(_) if !self.layer.is_buffered() => Err("spurious write buffer"),
            Some(wbuf) if wbuf.len() > wbuf.capacity() || wbuf.capacity() > MAX_BUFFER_SIZE => {
                Err("write buffer")
            }
            _ => Ok(()),
        }
    }

    /// Release the descriptor.
    ///
    /// Disconnects the substrate if asked to, unless the socket belongs to
    /// the caller, then wipes the endpoint, buffers and error text. Safe to
    /// call on a descriptor whose connect never completed; later calls do
    /// nothing.
    pub fn cleanup(&mut self, disconnect_transport: bool) {
        if self.released {
            return;
        }
        if disconnect_transport && !self.flags.is_user_socket() {
            debug!("Disconnecting {} stream", self.protocol);
            self.transport.disconnect(true);
        }
        self.wipe();
        self.released = true;
    }

    /// Whether `cleanup` has run
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    fn wipe(&mut self) {
        self.host.zeroize();
        self.path.zeroize();
        if let Some(wbuf) = self.write_buffer.as_mut() {
            wbuf.zeroize();
        }
        self.error.zeroize();
        self.port = 0;
        self.peer_type = PeerType::Unknown;
        self.connected = false;
    }
}

impl Drop for NetDescriptor {
    fn drop(&mut self) {
        self.cleanup(self.connected);
    }
}

impl fmt::Debug for NetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetDescriptor")
            .field("protocol", &self.protocol)
            .field("flags", &self.flags)
            .field("host", &self.host())
            .field("port", &self.port)
            .field("layer", &self.layer)
            .field("timeout", &self.timeout)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}
