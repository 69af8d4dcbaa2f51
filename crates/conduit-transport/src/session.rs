//! External secure-session substrate.
//!
//! A stream can run on top of an already-established secure session (TLS,
//! SSH) owned by the caller rather than on a raw socket. The session is an
//! external collaborator reached through [`SecureSession`]; this module only
//! adapts it to the [`Transport`] operation set.

use crate::transport::{Transport, TransportError, TransportFlags, TransportResult, TransportStats};
use std::time::Duration;
use tracing::{debug, warn};

/// Read timeout used for a blocking read when the session is set to poll
const SESSION_BLOCKING_TIMEOUT: Duration = Duration::from_secs(30);

/// Secure session supplied by the caller
pub trait SecureSession: Send {
    /// Whether the session handshake has completed
    fn is_active(&self) -> bool;

    /// Run the session handshake.
    ///
    /// # Errors
    /// Returns an error if the handshake fails.
    fn activate(&mut self) -> TransportResult<()>;

    /// Queue application data for sending.
    ///
    /// # Errors
    /// Returns an error if the session can't accept the data.
    fn push_data(&mut self, data: &[u8]) -> TransportResult<usize>;

    /// Send any queued data.
    ///
    /// # Errors
    /// Returns an error if transmission fails.
    fn flush(&mut self) -> TransportResult<()>;

    /// Retrieve received application data, waiting up to the read timeout.
    ///
    /// # Errors
    /// Returns an error if the session fails.
    fn pop_data(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Set the session read timeout, zero meaning poll
    fn set_read_timeout(&mut self, timeout: Duration);

    /// Last error reported by the session, if any
    fn error_message(&self) -> Option<String>;

    /// Release the session
    fn close(&mut self);
}

/// Transport that moves data through a [`SecureSession`]
pub struct SessionTransport {
    session: Box<dyn SecureSession>,
    timeout: Duration,
    stats: TransportStats,
}

impl SessionTransport {
    /// Wrap a caller-supplied session
    #[must_use]
    pub fn new(session: Box<dyn SecureSession>) -> Self {
        Self {
            session,
            timeout: SESSION_BLOCKING_TIMEOUT,
            stats: TransportStats::new(),
        }
    }

    /// Read timeout override needed for a read with these flags
    fn timeout_override(&self, flags: TransportFlags) -> Option<Duration> {
        if flags.is_nonblocking() && !self.timeout.is_zero() {
            Some(Duration::ZERO)
        } else if flags.contains(TransportFlags::BLOCKING) && self.timeout.is_zero() {
            Some(SESSION_BLOCKING_TIMEOUT)
        } else {
            None
        }
    }
}

impl Transport for SessionTransport {
    fn connect(&mut self, _host: &str, _port: u16, timeout: Duration) -> TransportResult<()> {
        self.timeout = timeout;
        if self.session.is_active() {
            return Ok(());
        }
        debug!("Activating transport session");
        self.session.activate().map_err(|e| {
            let message = self.session.error_message().unwrap_or_else(|| e.to_string());
            TransportError::Session(message)
        })
    }

    fn disconnect(&mut self, _full: bool) {
        self.session.close();
    }

    fn read(&mut self, buf: &mut [u8], flags: TransportFlags) -> TransportResult<usize> {
        let timeout_override = self.timeout_override(flags);
        if let Some(timeout) = timeout_override {
            self.session.set_read_timeout(timeout);
        }
        let result = self.session.pop_data(buf);
        if timeout_override.is_some() {
            self.session.set_read_timeout(self.timeout);
        }

        let read = match result {
            Ok(n) => n,
            Err(e) => {
                self.stats.record_recv_error();
                return Err(e);
            }
        };
        if read < buf.len() {
            self.stats.record_recv_error();
            warn!(
                "Only read {} out of {} bytes via session object",
                read,
                buf.len()
            );
            return Err(TransportError::PartialRead {
                read,
                wanted: buf.len(),
            });
        }
        self.stats.record_recv(read);
        Ok(read)
    }

    fn write(&mut self, buf: &[u8], _flags: TransportFlags) -> TransportResult<usize> {
        let result = self.session.push_data(buf).and_then(|written| {
            if written < buf.len() {
                warn!(
                    "Only wrote {} out of {} bytes via session object",
                    written,
                    buf.len()
                );
                return Err(TransportError::PartialWrite {
                    written,
                    wanted: buf.len(),
                });
            }
            self.session.flush()
        });
        if let Err(e) = result {
            self.stats.record_send_error();
            return Err(e);
        }
        self.stats.record_send(buf.len());
        Ok(buf.len())
    }

    fn is_ok(&self) -> bool {
        true
    }

    fn check(&mut self) -> TransportResult<()> {
        if self.session.is_active() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.session.set_read_timeout(timeout);
    }

    fn error_message(&self) -> Option<String> {
        self.session.error_message()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
