//! Connection orchestration.
//!
//! [`Connector`] turns a [`ConnectRequest`] into a connected [`NetStream`]:
//! it validates the request, resolves timeouts against the configured
//! defaults, parses the target, works out whether a proxy sits in the way,
//! picks the stream layering, builds the descriptor and drives the raw
//! connect plus any proxy handshake. Whatever fails along the way, the
//! partially built descriptor is released before the error is returned.

use crate::config::NetConfig;
use crate::descriptor::{NetDescriptor, NetFlags, Protocol};
use crate::error::{NetError, NetResult};
use crate::layer::select_layer;
use crate::proxy::{EnvProxyDiscovery, ProxyDiscovery, ProxyKind, detect_proxy, resolve_proxy_endpoint};
use crate::stream::NetStream;
use crate::tunnel::{connect_via_http_proxy, connect_via_socks_proxy};
use crate::url::{UrlInfo, UrlType, parse_url_with_default};
use crate::{
    HTTP_PROXY_DEFAULT_PORT, MAX_NETWORK_TIMEOUT, MAX_URL_SIZE, MIN_CONNECT_TIMEOUT,
    UNBOUNDED_TIMEOUT,
};
use conduit_transport::{
    DRIVER_GATE_TIMEOUT, DriverGate, SecureSession, SessionTransport, SocketFactory,
    SocketTransport, Transport, TransportFactory, TransportSpec,
};
use std::fmt;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Interface bound when a listen request names none
const ANY_INTERFACE: &str = "0.0.0.0";

/// Port for an HTTP target that names none
const HTTP_DEFAULT_PORT: u16 = 80;

/// How the stream reaches its peer
pub enum ConnectOptions {
    /// Dial (or, for a listener, bind) a named host, given as a host name,
    /// address or URL
    HostName(Option<String>),
    /// Use a socket the caller already connected
    NetworkSocket(TcpStream),
    /// Use a caller's socket after checking that it is still connected
    NetworkSocketCheck(TcpStream),
    /// Run over a caller's secure session
    TransportSession(Box<dyn SecureSession>),
}

impl ConnectOptions {
    fn is_user_socket(&self) -> bool {
        matches!(self, Self::NetworkSocket(_) | Self::NetworkSocketCheck(_))
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostName(name) => f.debug_tuple("HostName").field(name).finish(),
            Self::NetworkSocket(socket) => f.debug_tuple("NetworkSocket").field(socket).finish(),
            Self::NetworkSocketCheck(socket) => {
                f.debug_tuple("NetworkSocketCheck").field(socket).finish()
            }
            Self::TransportSession(_) => f.write_str("TransportSession(..)"),
        }
    }
}

/// A request to open a network stream
#[derive(Debug)]
pub struct ConnectRequest {
    /// Stream protocol
    pub protocol: Protocol,
    /// Where the stream goes
    pub options: ConnectOptions,
    /// Port to use when the name doesn't carry one, zero for none
    pub port: u16,
    /// Connect-phase timeout, overriding the configured default
    pub connect_timeout: Option<Duration>,
    /// Data-phase timeout, overriding the configured default
    pub timeout: Option<Duration>,
    /// Route HTTP through the proxy by host rather than as a plain relay
    pub tunnel: bool,
}

impl ConnectRequest {
    /// Request with default port, timeouts and routing
    #[must_use]
    pub fn new(protocol: Protocol, options: ConnectOptions) -> Self {
        Self {
            protocol,
            options,
            port: 0,
            connect_timeout: None,
            timeout: None,
            tunnel: false,
        }
    }

    /// Request for a named host
    #[must_use]
    pub fn host(protocol: Protocol, name: impl Into<String>) -> Self {
        Self::new(protocol, ConnectOptions::HostName(Some(name.into())))
    }

    /// Set the default port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set an explicit connect-phase timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set an explicit data-phase timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request host-based routing through an HTTP proxy
    #[must_use]
    pub fn with_tunnel(mut self, tunnel: bool) -> Self {
        self.tunnel = tunnel;
        self
    }
}

/// Opens network streams using a shared configuration.
///
/// # Examples
///
/// ```no_run
/// use conduit_core::{ConnectRequest, Connector, NetConfig, Protocol};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = Connector::new(NetConfig::default());
/// let mut stream = connector.connect(ConnectRequest::host(Protocol::Http, "ca.example.com"))?;
/// stream.write_all_flush(b"GET / HTTP/1.0\r\n\r\n")?;
/// stream.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct Connector {
    config: NetConfig,
    factory: Arc<dyn TransportFactory>,
    discovery: Arc<dyn ProxyDiscovery>,
    gate: &'static DriverGate,
}

impl Connector {
    /// Connector using OS sockets, environment proxy discovery and the
    /// process-wide driver gate
    #[must_use]
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            factory: Arc::new(SocketFactory::new()),
            discovery: Arc::new(EnvProxyDiscovery::new()),
            gate: DriverGate::global(),
        }
    }

    /// Use a different transport factory
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Use a different proxy discovery mechanism
    #[must_use]
    pub fn with_discovery(mut self, discovery: Arc<dyn ProxyDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Wait on a different driver gate
    #[must_use]
    pub fn with_gate(mut self, gate: &'static DriverGate) -> Self {
        self.gate = gate;
        self
    }

    /// Connection defaults
    #[must_use]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Open a client stream.
    ///
    /// # Errors
    ///
    /// - `NetError::Internal` if the request itself is malformed
    /// - `NetError::Open` if the target or a proxy URL is invalid, or the
    ///   connect or proxy handshake fails
    /// - `NetError::NotInitialized` if networking isn't available
    pub fn connect(&self, request: ConnectRequest) -> NetResult<NetStream> {
        self.open(request, false)
    }

    /// Open a listening stream. The name, if any, is the interface to bind;
    /// the single peer is accepted on first I/O.
    ///
    /// # Errors
    ///
    /// As for [`Connector::connect`].
    pub fn listen(&self, request: ConnectRequest) -> NetResult<NetStream> {
        self.open(request, true)
    }

    fn open(&self, request: ConnectRequest, server: bool) -> NetResult<NetStream> {
        if !cfg!(feature = "tcp") {
            return Err(NetError::Open("Networking support not available".into()));
        }
        validate_request(&request, server)
            .inspect_err(|e| error!("Rejected stream request: {}", e))?;
        self.config.validate()?;

        let ConnectRequest {
            protocol,
            options,
            port: default_port,
            connect_timeout,
            timeout,
            tunnel,
        } = request;

        let connect_timeout = match connect_timeout {
            Some(t) => t,
            None if server => UNBOUNDED_TIMEOUT,
            None => self.config.connect_timeout(),
        }
        .max(MIN_CONNECT_TIMEOUT);
        let saved_timeout = timeout.unwrap_or_else(|| self.config.read_timeout());

        let mut flags = NetFlags::new();
        if server {
            flags = flags.with(NetFlags::IS_SERVER);
        }
        if protocol == Protocol::Udp {
            flags = flags.with(NetFlags::DGRAM);
        }
        if options.is_user_socket() {
            flags = flags.with(NetFlags::USER_SOCKET);
        }

        // Endpoint and proxy, only for named hosts
        let mut host = String::new();
        let mut path = None;
        let mut port = default_port;
        let mut proxy = None;
        if let ConnectOptions::HostName(name) = &options {
            match name {
                Some(name) => {
                    let url_type = if protocol == Protocol::Http && !server {
                        UrlType::Http
                    } else {
                        UrlType::None
                    };
                    let default = (default_port != 0).then_some(default_port);
                    let url = parse_url_with_default(name.as_bytes(), default, url_type)
                        .map_err(|_| {
                            NetError::Open(if server {
                                "Invalid interface name/URL".into()
                            } else {
                                "Invalid host name/URL".into()
                            })
                        })?;
                    host = url.host().to_string();
                    path = url.location().map(str::to_string);
                    port = url
                        .port()
                        .or((url_type == UrlType::Http).then_some(HTTP_DEFAULT_PORT))
                        .unwrap_or(0);
                }
                None => debug!("Listening on all interfaces"),
            }
            if !server && port == 0 {
                return Err(NetError::Internal(format!("no port given for {host}")));
            }

            if !server {
                if let Some(route) = detect_proxy(protocol, &host, tunnel, &self.config) {
                    let endpoint = resolve_proxy_endpoint(&route, &host, self.discovery.as_ref())?;
                    if route.kind().is_http() {
                        flags = flags.with(if route.kind() == ProxyKind::HttpTunnel {
                            NetFlags::HTTP_TUNNEL
                        } else {
                            NetFlags::HTTP_PROXY
                        });
                    }
                    debug!(
                        "Using {:?} {}:{:?} for {}",
                        route.kind(),
                        endpoint.host(),
                        endpoint.port(),
                        host
                    );
                    proxy = Some((route.kind(), endpoint));
                }
            }
        }

        let layer = select_layer(protocol, &options)?;

        if !self.gate.wait(DRIVER_GATE_TIMEOUT) {
            return Err(not_initialized());
        }
        let check_socket = matches!(options, ConnectOptions::NetworkSocketCheck(_));
        let transport: Box<dyn Transport> = match options {
            ConnectOptions::HostName(_) => {
                let spec = if protocol == Protocol::Udp {
                    TransportSpec::datagram()
                } else {
                    TransportSpec::stream()
                };
                let spec = if server { spec.listening() } else { spec };
                self.factory.create(&spec)
            }
            ConnectOptions::NetworkSocket(socket) | ConnectOptions::NetworkSocketCheck(socket) => {
                Box::new(SocketTransport::from_user_socket(socket))
            }
            ConnectOptions::TransportSession(session) => {
                Box::new(SessionTransport::new(session))
            }
        };
        if !transport.is_ok() {
            return Err(not_initialized());
        }

        let mut descriptor = NetDescriptor::new(protocol, flags, layer, transport);
        descriptor.set_endpoint(&host, path.as_deref(), port);
        descriptor.set_timeouts(connect_timeout, saved_timeout);
        if layer.is_buffered() {
            descriptor.attach_write_buffer(self.config.buffer_size);
        }
        if let Err(e) = descriptor.sanity_check() {
            descriptor.cleanup(false);
            return Err(e);
        }

        let mut stream = NetStream::new(descriptor, self.config.buffer_size);
        match establish(&mut stream, check_socket, proxy.as_ref()) {
            Ok(()) => {
                stream.descriptor_mut().mark_connected();
                info!(
                    "{} {} stream {}:{}",
                    if server { "Listening" } else { "Opened" },
                    protocol,
                    if host.is_empty() { ANY_INTERFACE } else { &host },
                    port
                );
                Ok(stream)
            }
            Err(e) => {
                warn!("Couldn't open {} stream to {}:{}: {}", protocol, host, port, e);
                stream.descriptor_mut().cleanup(false);
                Err(e)
            }
        }
    }
}

fn not_initialized() -> NetError {
    NetError::NotInitialized("Networking subsystem not available".into())
}

/// Contract checks on the request shape
fn validate_request(request: &ConnectRequest, server: bool) -> NetResult<()> {
    match &request.options {
        ConnectOptions::HostName(None) if !server => {
            return Err(NetError::Internal("connect requires a host name".into()));
        }
        ConnectOptions::HostName(Some(name)) if name.is_empty() || name.len() >= MAX_URL_SIZE => {
            return Err(NetError::Internal(format!(
                "host name length {} out of range",
                name.len()
            )));
        }
        ConnectOptions::NetworkSocketCheck(_) if server => {
            return Err(NetError::Internal(
                "listen can't take a socket to validate".into(),
            ));
        }
        ConnectOptions::NetworkSocket(_) | ConnectOptions::NetworkSocketCheck(_)
            if request.protocol == Protocol::Udp =>
        {
            return Err(NetError::Internal(
                "caller-supplied sockets must be stream sockets".into(),
            ));
        }
        _ => {}
    }

    if let Some(t) = request.connect_timeout {
        if t > MAX_NETWORK_TIMEOUT && !(server && t == UNBOUNDED_TIMEOUT) {
            return Err(NetError::Internal(format!("connect timeout {t:?} out of range")));
        }
    }
    if let Some(t) = request.timeout {
        if t > MAX_NETWORK_TIMEOUT {
            return Err(NetError::Internal(format!("timeout {t:?} out of range")));
        }
    }
    Ok(())
}

/// Bring up the substrate and run any proxy handshake
fn establish(
    stream: &mut NetStream,
    check_socket: bool,
    proxy: Option<&(ProxyKind, UrlInfo)>,
) -> NetResult<()> {
    let host = stream.host().to_string();
    let port = stream.port();
    let flags = stream.flags();
    let timeout = stream.timeout();
    let transport = stream.descriptor_mut().transport_mut();

    if flags.is_user_socket() {
        if check_socket {
            transport.check()?;
        }
        transport.set_timeout(timeout);
        return Ok(());
    }

    match proxy {
        Some((_, endpoint)) => {
            let proxy_port = endpoint.port().unwrap_or(HTTP_PROXY_DEFAULT_PORT);
            transport.connect(endpoint.host(), proxy_port, timeout)?;
        }
        None if flags.is_server() && host.is_empty() => {
            transport.connect(ANY_INTERFACE, port, timeout)?;
        }
        None => transport.connect(&host, port, timeout)?,
    }

    match proxy {
        Some((ProxyKind::Socks, _)) => {
            connect_via_socks_proxy(stream.descriptor_mut().transport_mut(), &host, port)
        }
        Some(_) if stream.protocol() == Protocol::Http => {
            if !cfg!(feature = "http") {
                return Err(NetError::NotAvailable(
                    "HTTP proxy support not available".into(),
                ));
            }
            connect_via_http_proxy(stream, &host, port)
        }
        _ => Ok(()),
    }
}
