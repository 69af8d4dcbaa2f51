//! Transport factory for creating transport instances.
//!
//! The connection orchestrator never constructs socket transports directly;
//! it asks a [`TransportFactory`] so that each connection's driver can be
//! substituted (scripted transports in tests, custom resolvers in callers).

use crate::resolver::{Resolver, SystemResolver};
use crate::socket::{SocketKind, SocketTransport};
use crate::transport::Transport;
use std::sync::Arc;

/// What kind of substrate a connection needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSpec {
    /// Stream or datagram socket
    pub kind: SocketKind,
    /// Listening rather than dialling
    pub server: bool,
}

impl TransportSpec {
    /// Outbound stream
    #[must_use]
    pub fn stream() -> Self {
        Self {
            kind: SocketKind::Stream,
            server: false,
        }
    }

    /// Outbound datagram socket
    #[must_use]
    pub fn datagram() -> Self {
        Self {
            kind: SocketKind::Datagram,
            server: false,
        }
    }

    /// Same kind, listening role
    #[must_use]
    pub fn listening(mut self) -> Self {
        self.server = true;
        self
    }
}

/// Builds raw transport drivers for named-host connections.
///
/// # Examples
///
/// ```no_run
/// use conduit_transport::factory::{SocketFactory, TransportFactory, TransportSpec};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = SocketFactory::new();
/// let mut transport = factory.create(&TransportSpec::stream());
/// transport.connect("example.com", 80, Duration::from_secs(30))?;
/// # Ok(())
/// # }
/// ```
pub trait TransportFactory: Send + Sync {
    /// Create an unconnected transport matching `spec`
    fn create(&self, spec: &TransportSpec) -> Box<dyn Transport>;
}

/// Factory producing [`SocketTransport`]s that share one resolver
#[derive(Clone)]
pub struct SocketFactory {
    resolver: Arc<dyn Resolver>,
}

impl SocketFactory {
    /// Factory using the system resolver
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    /// Factory using a caller-supplied resolver
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }
}

impl Default for SocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for SocketFactory {
    fn create(&self, spec: &TransportSpec) -> Box<dyn Transport> {
        Box::new(SocketTransport::new(
            spec.kind,
            spec.server,
            Arc::clone(&self.resolver),
        ))
    }
}
