//! # CONDUIT Core
//!
//! Network stream layer for the CONDUIT PKI transport stack.
//!
//! This crate provides:
//! - Connection orchestration (target parsing, timeouts, proxy selection)
//! - Proxy detection and traversal (HTTP `CONNECT`, SOCKS5)
//! - Read-ahead and write-assembly buffering for HTTP-layered streams
//! - The connection descriptor and the caller-facing stream handle
//! - URL parsing and bounded error reporting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         NetStream                               │
//! │   (caller handle: read-ahead cursor, error record)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        NetDescriptor                            │
//! │   (endpoint, timeouts, layering, write-assembly buffer)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Transport                               │
//! │   (OS socket or caller-supplied secure session)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::time::Duration;

pub mod buffered;
pub mod config;
pub mod connect;
pub mod descriptor;
pub mod error;
pub mod layer;
pub mod proxy;
pub mod stream;
pub mod tunnel;
pub mod url;

pub use buffered::{ReadAhead, WriteBuffer, buffered_read, buffered_write};
pub use config::{AUTODETECT_PROXY, NetConfig};
pub use connect::{ConnectOptions, ConnectRequest, Connector};
pub use descriptor::{NetDescriptor, NetFlags, PeerType, Protocol};
pub use error::{ErrorCode, ErrorInfo, NetError, NetResult};
pub use layer::{StreamLayer, Substrate, WireLayer, select_layer};
pub use proxy::{
    EnvProxyDiscovery, NoProxyDiscovery, ProxyDiscovery, ProxyKind, ProxyRoute, detect_proxy,
    is_local_host, resolve_proxy_endpoint,
};
pub use stream::NetStream;
pub use tunnel::{connect_via_http_proxy, connect_via_socks_proxy};
pub use url::{UrlInfo, UrlScheme, UrlType, parse_url, parse_url_with_default};

/// Read-ahead and write-assembly buffer capacity
pub const NETWORK_BUFFER_SIZE: usize = 4096;

/// Largest buffer a stream may be configured with
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Connect timeouts are never shorter than this
pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout used when neither the caller nor the configuration gives one
pub const DEFAULT_NET_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for stream timeouts
pub const MAX_NETWORK_TIMEOUT: Duration = Duration::from_secs(300);

/// Wait forever, allowed only while a listening stream waits for its peer
pub const UNBOUNDED_TIMEOUT: Duration = Duration::MAX;

/// Shortest host name
pub const MIN_HOST_SIZE: usize = 1;

/// Longest host name
pub const MAX_HOST_SIZE: usize = 255;

/// Shortest URL location
pub const MIN_LOCATION_SIZE: usize = 1;

/// Longest URL location
pub const MAX_LOCATION_SIZE: usize = 1024;

/// Longest URL accepted by the parser
pub const MAX_URL_SIZE: usize = 2048;

/// Longest error message kept in an error record
pub const MAX_ERRMSG_SIZE: usize = 512;

/// Longest proxy `CONNECT` response header
pub const MAX_PROXY_RESPONSE: usize = 4096;

/// Port assumed for a proxy URL that names none
pub const HTTP_PROXY_DEFAULT_PORT: u16 = 80;
