//! Stream layering selection.
//!
//! A stream's behaviour is fixed at connect time along two axes: the
//! substrate that moves the bytes (a socket or a caller's secure session)
//! and the wire layering on top of it (pass-through or HTTP framing).

use crate::connect::ConnectOptions;
use crate::descriptor::Protocol;
use crate::error::{NetError, NetResult};

/// Framing applied above the substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireLayer {
    /// Reads and writes go straight to the substrate
    Direct,
    /// HTTP framing, with buffered transport I/O underneath
    Http,
}

/// What carries the bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substrate {
    /// OS socket
    Socket,
    /// Caller-supplied secure session
    Session,
}

/// Selected layering for one stream, fixed for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayer {
    /// Wire layering
    pub wire: WireLayer,
    /// Substrate
    pub substrate: Substrate,
}

impl StreamLayer {
    /// Whether the stream uses the read-ahead and write-assembly buffers.
    ///
    /// Only HTTP over a socket does; sessions do their own buffering and
    /// plain TCP/UDP streams pass data through untouched.
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        self.wire == WireLayer::Http && self.substrate == Substrate::Socket
    }
}

/// Choose the layering for a connection.
///
/// # Errors
///
/// Returns `NetError::NotAvailable` if HTTP layering is requested but not
/// built in.
pub fn select_layer(protocol: Protocol, options: &ConnectOptions) -> NetResult<StreamLayer> {
    let substrate = match options {
        ConnectOptions::TransportSession(_) => Substrate::Session,
        _ => Substrate::Socket,
    };
    let wire = match protocol {
        Protocol::Tcp | Protocol::Udp => WireLayer::Direct,
        Protocol::Http if cfg!(feature = "http") => WireLayer::Http,
        Protocol::Http => {
            return Err(NetError::NotAvailable(
                "HTTP stream layer not available".into(),
            ));
        }
    };
    Ok(StreamLayer { wire, substrate })
}
