//! Socket substrate for TCP streams, UDP datagrams and listening sockets.
//!
//! Features:
//! - Connect with a bounded timeout across every resolved address
//! - Blocking reads bounded by the active timeout, one-shot non-blocking reads
//! - Listening sockets that accept their single peer on first I/O
//! - Caller-supplied sockets that are used but never shut down

use crate::gate::{DriverGate, GateState};
use crate::resolver::{Resolver, SystemResolver};
use crate::transport::{Transport, TransportError, TransportFlags, TransportResult, TransportStats};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{
    Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Listen backlog for server sockets
const LISTEN_BACKLOG: i32 = 5;

/// Poll interval while waiting for an incoming connection
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Smallest timeout handed to the OS, which rejects a zero timeout
const MIN_OS_TIMEOUT: Duration = Duration::from_millis(1);

fn to_os_timeout(timeout: Duration) -> Option<Duration> {
    if timeout == Duration::MAX {
        None
    } else {
        Some(timeout.max(MIN_OS_TIMEOUT))
    }
}

/// Socket flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Connection-oriented TCP stream
    Stream,
    /// Connectionless UDP datagrams
    Datagram,
}

#[derive(Debug)]
enum SocketState {
    Idle,
    Listening(TcpListener),
    Stream(TcpStream),
    Datagram {
        socket: UdpSocket,
        peer: Option<SocketAddr>,
    },
}

/// Transport over a plain OS socket
pub struct SocketTransport {
    kind: SocketKind,
    server: bool,
    user_socket: bool,
    state: SocketState,
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
    // Connect-phase timeout, still in force for the lazy accept
    accept_timeout: Duration,
    stats: TransportStats,
}

impl SocketTransport {
    /// Create an unconnected client transport using the system resolver
    #[must_use]
    pub fn client(kind: SocketKind) -> Self {
        Self::new(kind, false, Arc::new(SystemResolver))
    }

    /// Create an unbound server transport using the system resolver
    #[must_use]
    pub fn server(kind: SocketKind) -> Self {
        Self::new(kind, true, Arc::new(SystemResolver))
    }

    /// Create a transport with an explicit resolver
    #[must_use]
    pub fn new(kind: SocketKind, server: bool, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            kind,
            server,
            user_socket: false,
            state: SocketState::Idle,
            resolver,
            timeout: Duration::from_secs(30),
            accept_timeout: Duration::from_secs(30),
            stats: TransportStats::new(),
        }
    }

    /// Wrap an already-connected socket supplied by the caller.
    ///
    /// The caller keeps its own handle to the connection; this transport
    /// never shuts it down, even on a full disconnect.
    #[must_use]
    pub fn from_user_socket(stream: TcpStream) -> Self {
        Self {
            kind: SocketKind::Stream,
            server: false,
            user_socket: true,
            state: SocketState::Stream(stream),
            resolver: Arc::new(SystemResolver),
            timeout: Duration::from_secs(30),
            accept_timeout: Duration::from_secs(30),
            stats: TransportStats::new(),
        }
    }

    /// Get the socket flavour
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Check whether this is a listening transport
    pub fn is_server(&self) -> bool {
        self.server
    }

    /// OS-level timeout for the active timeout value, `None` meaning wait
    /// indefinitely
    fn os_timeout(&self) -> Option<Duration> {
        to_os_timeout(self.timeout)
    }

    fn new_socket(addr: &SocketAddr, kind: SocketKind) -> io::Result<Socket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        match kind {
            SocketKind::Stream => Socket::new(domain, Type::STREAM, Some(Protocol::TCP)),
            SocketKind::Datagram => Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)),
        }
    }

    fn bind(&mut self, addr: SocketAddr) -> TransportResult<()> {
        let socket = Self::new_socket(&addr, self.kind)
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;

        self.state = match self.kind {
            SocketKind::Stream => {
                socket
                    .listen(LISTEN_BACKLOG)
                    .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
                SocketState::Listening(socket.into())
            }
            SocketKind::Datagram => SocketState::Datagram {
                socket: socket.into(),
                peer: None,
            },
        };
        info!("Listening on {}", addr);
        Ok(())
    }

    fn dial(&mut self, host: &str, port: u16, addrs: &[SocketAddr]) -> TransportResult<()> {
        let mut last_error = None;

        for addr in addrs {
            let result = match self.kind {
                SocketKind::Stream => self.dial_stream(addr),
                SocketKind::Datagram => Self::dial_datagram(addr),
            };
            match result {
                Ok(state) => {
                    debug!("Connected to {}:{} via {}", host, port, addr);
                    self.state = state;
                    self.apply_timeouts()?;
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::ConnectFailed {
            host: host.to_string(),
            port,
            reason: last_error.map_or_else(|| "no addresses".to_string(), |e| e.to_string()),
        })
    }

    fn dial_stream(&self, addr: &SocketAddr) -> io::Result<SocketState> {
        let socket = Self::new_socket(addr, SocketKind::Stream)?;
        let target = SockAddr::from(*addr);
        match self.os_timeout() {
            Some(timeout) => socket.connect_timeout(&target, timeout)?,
            None => socket.connect(&target)?,
        }
        let stream: TcpStream = socket.into();
        // Small PKI messages, don't let Nagle hold them back
        stream.set_nodelay(true)?;
        Ok(SocketState::Stream(stream))
    }

    fn dial_datagram(addr: &SocketAddr) -> io::Result<SocketState> {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
        Ok(SocketState::Datagram {
            socket,
            peer: Some(*addr),
        })
    }

    fn apply_timeouts(&self) -> TransportResult<()> {
        let timeout = self.os_timeout();
        match &self.state {
            SocketState::Stream(stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)?;
            }
            SocketState::Datagram { socket, .. } => {
                socket.set_read_timeout(timeout)?;
                socket.set_write_timeout(timeout)?;
            }
            SocketState::Listening(_) | SocketState::Idle => {}
        }
        Ok(())
    }

    /// Accept the single peer of a listening transport, waiting up to the
    /// timeout given when the socket was bound
    fn ensure_accepted(&mut self) -> TransportResult<()> {
        let SocketState::Listening(listener) = &self.state else {
            return Ok(());
        };

        let deadline = to_os_timeout(self.accept_timeout).map(|t| Instant::now() + t);
        listener.set_nonblocking(true)?;
        let stream = loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {}", peer);
                    break stream;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(TransportError::Timeout);
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        self.state = SocketState::Stream(stream);
        self.apply_timeouts()
    }

    fn map_blocking_error(e: io::Error) -> TransportError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io(e),
        }
    }

    fn read_stream(stream: &mut TcpStream, buf: &mut [u8], nonblocking: bool) -> TransportResult<usize> {
        if nonblocking {
            stream.set_nonblocking(true)?;
            let result = stream.read(buf);
            stream.set_nonblocking(false)?;
            return match result {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(Self::map_blocking_error(e)),
            };
        }

        loop {
            match stream.read(buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Self::map_blocking_error(e)),
            }
        }
    }

    fn read_datagram(
        socket: &UdpSocket,
        peer: &mut Option<SocketAddr>,
        buf: &mut [u8],
        nonblocking: bool,
    ) -> TransportResult<usize> {
        if nonblocking {
            socket.set_nonblocking(true)?;
        }
        let result = socket.recv_from(buf);
        if nonblocking {
            socket.set_nonblocking(false)?;
        }
        match result {
            Ok((n, from)) => {
                if peer.is_none() {
                    *peer = Some(from);
                }
                Ok(n)
            }
            Err(e) if nonblocking && e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Self::map_blocking_error(e)),
        }
    }
}

impl Transport for SocketTransport {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> TransportResult<()> {
        self.timeout = timeout;
        let addrs = self.resolver.resolve(host, port)?;

        if self.server {
            let addr = *addrs
                .first()
                .ok_or_else(|| TransportError::Resolve(host.to_string()))?;
            self.accept_timeout = timeout;
            return self.bind(addr);
        }
        self.dial(host, port, &addrs)
    }

    fn disconnect(&mut self, full: bool) {
        if self.user_socket {
            return;
        }
        if let SocketState::Stream(stream) = &self.state {
            if full {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!("Shutdown failed: {}", e);
                }
            }
        }
        self.state = SocketState::Idle;
    }

    fn read(&mut self, buf: &mut [u8], flags: TransportFlags) -> TransportResult<usize> {
        self.ensure_accepted()?;
        let nonblocking = flags.is_nonblocking();
        let result = match &mut self.state {
            SocketState::Stream(stream) => Self::read_stream(stream, buf, nonblocking),
            SocketState::Datagram { socket, peer } => {
                Self::read_datagram(socket, peer, buf, nonblocking)
            }
            SocketState::Listening(_) | SocketState::Idle => Err(TransportError::NotConnected),
        };

        match &result {
            Ok(n) => self.stats.record_recv(*n),
            Err(e) => {
                self.stats.record_recv_error();
                if !matches!(e, TransportError::Timeout) {
                    warn!("Socket read failed: {}", e);
                }
            }
        }
        result
    }

    fn write(&mut self, buf: &[u8], _flags: TransportFlags) -> TransportResult<usize> {
        self.ensure_accepted()?;
        let result = match &mut self.state {
            SocketState::Stream(stream) => loop {
                match stream.write(buf) {
                    Ok(n) => break Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => break Err(Self::map_blocking_error(e)),
                }
            },
            SocketState::Datagram { socket, peer } => match peer {
                Some(addr) => socket.send_to(buf, *addr).map_err(Self::map_blocking_error),
                None => Err(TransportError::NotConnected),
            },
            SocketState::Listening(_) | SocketState::Idle => Err(TransportError::NotConnected),
        };

        match &result {
            Ok(n) => self.stats.record_send(*n),
            Err(e) => {
                self.stats.record_send_error();
                warn!("Socket write failed: {}", e);
            }
        }
        result
    }

    fn is_ok(&self) -> bool {
        DriverGate::global().state() == GateState::Ready
    }

    fn check(&mut self) -> TransportResult<()> {
        let SocketState::Stream(stream) = &self.state else {
            return Err(TransportError::NotConnected);
        };
        stream.peer_addr().map_err(|_| TransportError::NotConnected)?;
        if let Some(e) = stream.take_error()? {
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if let Err(e) = self.apply_timeouts() {
            warn!("Couldn't apply socket timeout: {}", e);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            SocketState::Listening(listener) => listener.local_addr().ok(),
            SocketState::Stream(stream) => stream.local_addr().ok(),
            SocketState::Datagram { socket, .. } => socket.local_addr().ok(),
            SocketState::Idle => None,
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn loopback_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_tcp_connect_write_read() {
        let (listener, port) = loopback_listener();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(b"world").unwrap();
            buf
        });

        let mut transport = SocketTransport::client(SocketKind::Stream);
        transport.connect("127.0.0.1", port, TEST_TIMEOUT).unwrap();
        assert_eq!(transport.write(b"hello", TransportFlags::NONE).unwrap(), 5);

        let mut received = Vec::new();
        while received.len() < 5 {
            let mut buf = [0u8; 16];
            let n = transport.read(&mut buf, TransportFlags::BLOCKING).unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"world");
        assert_eq!(&server.join().unwrap(), b"hello");

        let stats = transport.stats();
        assert_eq!(stats.bytes_sent, 5);
        assert_eq!(stats.bytes_received, 5);
    }

    #[test]
    fn test_tcp_nonblocking_read_returns_zero() {
        let (listener, port) = loopback_listener();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(100));
            drop(sock);
        });

        let mut transport = SocketTransport::client(SocketKind::Stream);
        transport.connect("127.0.0.1", port, TEST_TIMEOUT).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf, TransportFlags::NONBLOCKING).unwrap(), 0);
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_blocking_read_times_out() {
        let (listener, port) = loopback_listener();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(sock);
        });

        let mut transport = SocketTransport::client(SocketKind::Stream);
        transport.connect("127.0.0.1", port, TEST_TIMEOUT).unwrap();
        transport.set_timeout(Duration::from_millis(50));
        let mut buf = [0u8; 16];
        let result = transport.read(&mut buf, TransportFlags::BLOCKING);
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert_eq!(transport.stats().recv_errors, 1);
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_read_after_peer_close() {
        let (listener, port) = loopback_listener();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            drop(sock);
        });

        let mut transport = SocketTransport::client(SocketKind::Stream);
        transport.connect("127.0.0.1", port, TEST_TIMEOUT).unwrap();
        server.join().unwrap();
        let mut buf = [0u8; 16];
        let result = transport.read(&mut buf, TransportFlags::BLOCKING);
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn test_tcp_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let (listener, port) = loopback_listener();
        drop(listener);

        let mut transport = SocketTransport::client(SocketKind::Stream);
        let result = transport.connect("127.0.0.1", port, TEST_TIMEOUT);
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[test]
    fn test_server_accepts_on_first_io() {
        let mut transport = SocketTransport::server(SocketKind::Stream);
        transport.connect("127.0.0.1", 0, TEST_TIMEOUT).unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = thread::spawn(move || {
            let mut sock = TcpStream::connect(addr).unwrap();
            sock.write_all(b"ping").unwrap();
        });

        let mut buf = [0u8; 4];
        let mut total = 0;
        while total < 4 {
            total += transport
                .read(&mut buf[total..], TransportFlags::BLOCKING)
                .unwrap();
        }
        assert_eq!(&buf, b"ping");
        client.join().unwrap();
    }

    #[test]
    fn test_server_accept_times_out() {
        let mut transport = SocketTransport::server(SocketKind::Stream);
        transport
            .connect("127.0.0.1", 0, Duration::from_millis(50))
            .unwrap();
        let mut buf = [0u8; 4];
        let result = transport.read(&mut buf, TransportFlags::BLOCKING);
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[test]
    fn test_accept_keeps_bind_timeout() {
        let mut transport = SocketTransport::server(SocketKind::Stream);
        transport
            .connect("127.0.0.1", 0, Duration::from_millis(50))
            .unwrap();
        // Data-phase timeout doesn't stretch the wait for a peer
        transport.set_timeout(Duration::from_secs(300));
        let started = Instant::now();
        let mut buf = [0u8; 4];
        let result = transport.read(&mut buf, TransportFlags::BLOCKING);
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_udp_connected_exchange() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = peer.local_addr().unwrap().port();

        let mut transport = SocketTransport::client(SocketKind::Datagram);
        transport.connect("127.0.0.1", port, TEST_TIMEOUT).unwrap();
        assert_eq!(transport.write(b"datagram", TransportFlags::NONE).unwrap(), 8);

        let mut buf = [0u8; 64];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"datagram");
        peer.send_to(b"reply", from).unwrap();

        let n = transport.read(&mut buf, TransportFlags::BLOCKING).unwrap();
        assert_eq!(&buf[..n], b"reply");
    }

    #[test]
    fn test_user_socket_check_and_no_shutdown() {
        let (listener, port) = loopback_listener();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2];
            sock.read_exact(&mut buf).unwrap();
            buf
        });

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut transport = SocketTransport::from_user_socket(stream.try_clone().unwrap());
        transport.check().unwrap();
        transport.disconnect(true);

        // The caller's handle is still usable after the transport let go
        let mut own = stream;
        own.write_all(b"ok").unwrap();
        assert_eq!(&server.join().unwrap(), b"ok");
    }

    #[test]
    fn test_socket_substrate_is_available() {
        assert!(SocketTransport::client(SocketKind::Stream).is_ok());
    }

    #[test]
    fn test_check_unconnected_fails() {
        let mut transport = SocketTransport::client(SocketKind::Stream);
        assert!(matches!(transport.check(), Err(TransportError::NotConnected)));
        let mut buf = [0u8; 1];
        assert!(matches!(
            transport.read(&mut buf, TransportFlags::BLOCKING),
            Err(TransportError::NotConnected)
        ));
    }
}
