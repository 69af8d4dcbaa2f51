//! Upper stream handle.
//!
//! [`NetStream`] is what callers hold. It owns exactly one connection
//! descriptor and, for buffered streams, the read-ahead cache in front of
//! it. Reads and writes dispatch on the layering chosen at connect time.

use crate::buffered::{ReadAhead, buffered_read, buffered_write};
use crate::descriptor::{NetDescriptor, NetFlags, PeerType, Protocol};
use crate::error::{ErrorInfo, NetError, NetResult};
use crate::layer::{StreamLayer, Substrate, WireLayer};
use conduit_transport::{TransportError, TransportFlags};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Open network stream
#[derive(Debug)]
pub struct NetStream {
    descriptor: NetDescriptor,
    read_ahead: Option<ReadAhead>,
}

impl NetStream {
    /// Wrap a descriptor, adding a read-ahead cache if the layering is
    /// buffered
    pub(crate) fn new(descriptor: NetDescriptor, buffer_size: usize) -> Self {
        let read_ahead = descriptor
            .layer()
            .is_buffered()
            .then(|| ReadAhead::new(buffer_size));
        Self {
            descriptor,
            read_ahead,
        }
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut NetDescriptor {
        &mut self.descriptor
    }

    /// Read from the stream.
    ///
    /// Buffered (HTTP) streams fill `buf` completely; direct streams return
    /// as soon as at least one byte is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or times out. For buffered
    /// streams the contents of `buf` are undefined after a failure.
    pub fn read(&mut self, buf: &mut [u8]) -> NetResult<usize> {
        self.begin()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match self.read_ahead.as_mut() {
            Some(cache) => buffered_read(cache, self.descriptor.transport_mut(), buf),
            None => self
                .descriptor
                .transport_mut()
                .read(buf, TransportFlags::BLOCKING),
        };
        self.finish(result.map_err(NetError::from))
    }

    /// Write to the stream.
    ///
    /// Buffered streams may hold the data back until a later write or
    /// [`flush`](Self::flush). Returns how many bytes of `data` were
    /// accepted; a direct stream may accept fewer than offered.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or times out. A buffered
    /// stream whose transport takes only part of the data fails with a
    /// timeout: some of `data` may already be queued, so it must not be
    /// offered again.
    pub fn write(&mut self, data: &[u8]) -> NetResult<usize> {
        self.begin()?;
        let result = match self.descriptor.io_parts() {
            (transport, Some(wbuf)) => {
                buffered_write(wbuf, transport, data, false).and_then(|written| {
                    if written < data.len() {
                        debug!("Transport stalled after {} of {} bytes", written, data.len());
                        return Err(TransportError::Timeout);
                    }
                    Ok(written)
                })
            }
            (_, None) if data.is_empty() => Ok(0),
            (transport, None) => transport.write(data, TransportFlags::NONE),
        };
        self.finish(result.map_err(NetError::on_write))
    }

    /// Send any data held in the write-assembly buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails, or a timeout if it stops
    /// taking the buffered data.
    pub fn flush(&mut self) -> NetResult<()> {
        self.begin()?;
        let result = match self.descriptor.io_parts() {
            (transport, Some(wbuf)) => {
                // Each pass either moves at least one byte or fails
                let mut result = Ok(());
                while !wbuf.is_empty() {
                    if let Err(e) = buffered_write(wbuf, transport, &[], true) {
                        result = Err(e);
                        break;
                    }
                }
                result
            }
            (_, None) => Ok(()),
        };
        self.finish(result.map_err(NetError::on_write))
    }

    /// Write all of `data` and flush it out.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or stops accepting data.
    pub fn write_all_flush(&mut self, data: &[u8]) -> NetResult<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let written = self.write(rest)?;
            if written == 0 {
                return self.finish(Err(NetError::from(TransportError::Timeout)));
            }
            rest = &rest[written..];
        }
        self.flush()
    }

    /// Close the stream, releasing its descriptor.
    ///
    /// Caller-supplied sockets are left open.
    pub fn disconnect(mut self) {
        debug!("Closing {} stream to {}", self.protocol(), self.host());
        self.descriptor.cleanup(true);
    }

    /// Last error recorded for this stream.
    ///
    /// For session-layered streams the session's own error text is pulled
    /// up first.
    pub fn error_info(&mut self) -> ErrorInfo {
        if self.descriptor.layer().substrate == Substrate::Session {
            if let Some(message) = self.descriptor.transport().error_message() {
                self.descriptor.error_mut().set_message(&message);
            }
        }
        self.descriptor.error().clone()
    }

    /// Record the peer classification
    pub fn set_peer_type(&mut self, peer_type: PeerType) {
        self.descriptor.set_peer_type(peer_type);
    }

    /// Peer classification
    #[must_use]
    pub fn peer_type(&self) -> PeerType {
        self.descriptor.peer_type()
    }

    /// Stream protocol
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.descriptor.protocol()
    }

    /// Role flags
    #[must_use]
    pub fn flags(&self) -> NetFlags {
        self.descriptor.flags()
    }

    /// Layering selected at connect time
    #[must_use]
    pub fn layer(&self) -> StreamLayer {
        self.descriptor.layer()
    }

    /// Target host or bind interface
    #[must_use]
    pub fn host(&self) -> &str {
        self.descriptor.host()
    }

    /// Location part of the target URL
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.descriptor.path()
    }

    /// Target or listening port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.descriptor.port()
    }

    /// Active timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.descriptor.timeout()
    }

    /// Local socket address, if the substrate is a socket
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.descriptor.transport().local_addr()
    }

    /// Bytes sitting in the read-ahead cache
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.read_ahead.as_ref().map_or(0, ReadAhead::available)
    }

    /// Whether the stream uses HTTP framing
    #[must_use]
    pub fn is_http(&self) -> bool {
        self.descriptor.layer().wire == WireLayer::Http
    }

    /// Start of every entry point: forget the last error, check invariants
    fn begin(&mut self) -> NetResult<()> {
        self.descriptor.error_mut().clear();
        let checked = self.descriptor.sanity_check().and_then(|()| {
            match &self.read_ahead {
                Some(cache) if !cache.is_consistent() => {
                    Err(NetError::Internal("read-ahead cursor".into()))
                }
                _ => Ok(()),
            }
        });
        self.finish(checked)
    }

    fn finish<T>(&mut self, result: NetResult<T>) -> NetResult<T> {
        if let Err(e) = &result {
            let info = ErrorInfo::from_error(e);
            self.descriptor.error_mut().set(info.code(), info.message());
        }
        result
    }
}

impl io::Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match NetStream::read(self, buf) {
            Ok(n) => Ok(n),
            Err(NetError::Transport(TransportError::Closed)) => Ok(0),
            Err(NetError::Transport(TransportError::Io(e))) => Err(e),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl io::Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        NetStream::write(self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        NetStream::flush(self).map_err(io::Error::other)
    }
}
