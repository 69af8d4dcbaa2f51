//! # CONDUIT Transport
//!
//! Raw transport drivers for the CONDUIT network stream layer.
//!
//! This crate provides:
//! - The `Transport` operation set every stream substrate implements
//! - TCP/UDP socket transports, including listening sockets and
//!   caller-supplied sockets
//! - An adapter for caller-supplied secure sessions
//! - The name-resolution seam and the driver-ready gate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod factory;
pub mod gate;
pub mod resolver;
pub mod session;
pub mod socket;
pub mod transport;

pub use factory::{SocketFactory, TransportFactory, TransportSpec};
pub use gate::{DriverGate, GateState, DRIVER_GATE_TIMEOUT};
pub use resolver::{Resolver, SystemResolver};
pub use session::{SecureSession, SessionTransport};
pub use socket::{SocketKind, SocketTransport};
pub use transport::{
    Transport, TransportError, TransportFlags, TransportResult, TransportStats,
};
