//! Integration tests for the CONDUIT stream layer.
//!
//! The scenario tests run the connector against a recording factory; the
//! loopback tests open real sockets, with threaded mock proxies standing in
//! for HTTP and SOCKS proxies.

use conduit_core::{
    ConnectOptions, ConnectRequest, Connector, MIN_CONNECT_TIMEOUT, NetConfig, NetError,
    NoProxyDiscovery, Protocol,
};
use conduit_integration_tests::mock_proxy::{http_connect_proxy, socks5_proxy};
use conduit_integration_tests::test_helpers::{RecordingFactory, ci_timeout};
use conduit_transport::{SecureSession, TransportResult};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CONNECT_REQUEST: &[u8] = b"CONNECT example.com:80 HTTP/1.1\r\nHost: example.com:80\r\n\r\n";

fn scripted_connector(config: NetConfig, factory: &RecordingFactory) -> Connector {
    Connector::new(config)
        .with_factory(Arc::new(factory.clone()))
        .with_discovery(Arc::new(NoProxyDiscovery))
}

fn loopback_connector(config: NetConfig) -> Connector {
    Connector::new(config).with_discovery(Arc::new(NoProxyDiscovery))
}

fn read_exactly(stream: &mut conduit_core::NetStream, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        let mut buf = vec![0u8; len - out.len()];
        let n = stream.read(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    out
}

// ============================================================================
// Connector Scenarios
// ============================================================================

#[test]
fn test_scenario_direct_http() {
    let factory = RecordingFactory::new();
    let stream = scripted_connector(NetConfig::default(), &factory)
        .connect(ConnectRequest::host(Protocol::Http, "example.com").with_port(80))
        .unwrap();

    let connects = factory.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!((connects[0].0.as_str(), connects[0].1), ("example.com", 80));
    assert!(factory.transport().script().writes.is_empty());
    assert!(!factory.specs()[0].server);
    stream.disconnect();
    assert_eq!(factory.transport().script().disconnects, 1);
}

#[test]
fn test_scenario_http_proxy() {
    let factory = RecordingFactory::new();
    factory
        .transport()
        .script()
        .chunks
        .push_back(b"HTTP/1.1 200 Connection established\r\n\r\n".to_vec());
    let config = NetConfig::default().with_http_proxy("proxy.local:8080");
    let stream = scripted_connector(config, &factory)
        .connect(ConnectRequest::host(Protocol::Http, "example.com").with_port(80))
        .unwrap();

    let connects = factory.connects();
    assert_eq!((connects[0].0.as_str(), connects[0].1), ("proxy.local", 8080));
    assert_eq!(factory.transport().written(), CONNECT_REQUEST);
    assert!(stream.flags().is_proxied());
    assert_eq!((stream.host(), stream.port()), ("example.com", 80));
}

#[test]
fn test_scenario_local_target_with_proxies() {
    let factory = RecordingFactory::new();
    let config = NetConfig::default()
        .with_http_proxy("proxy.local:8080")
        .with_socks_proxy("socks.local:1080");
    scripted_connector(config, &factory)
        .connect(ConnectRequest::host(Protocol::Http, "127.0.0.1").with_port(80))
        .unwrap();

    let connects = factory.connects();
    assert_eq!((connects[0].0.as_str(), connects[0].1), ("127.0.0.1", 80));
    assert!(factory.transport().script().writes.is_empty());
}

#[test]
fn test_scenario_connect_timeout_floor() {
    let factory = RecordingFactory::new();
    scripted_connector(NetConfig::default(), &factory)
        .connect(
            ConnectRequest::host(Protocol::Http, "example.com")
                .with_port(80)
                .with_connect_timeout(Duration::from_secs(2)),
        )
        .unwrap();
    assert_eq!(factory.connects()[0].2, MIN_CONNECT_TIMEOUT);
}

#[test]
fn test_http_writes_coalesce_until_flush() {
    let factory = RecordingFactory::new();
    let mut stream = scripted_connector(NetConfig::default(), &factory)
        .connect(ConnectRequest::host(Protocol::Http, "example.com").with_port(80))
        .unwrap();

    stream.write(b"POST /pkix/ HTTP/1.1\r\n").unwrap();
    stream.write(b"Content-Length: 0\r\n\r\n").unwrap();
    assert!(factory.transport().script().writes.is_empty());
    stream.flush().unwrap();

    let writes = factory.transport().script().writes.clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0], b"POST /pkix/ HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
}

// ============================================================================
// Loopback Streams
// ============================================================================

#[test]
fn test_loopback_direct_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        sock.read_exact(&mut buf).unwrap();
        sock.write_all(b"world").unwrap();
        buf
    });

    let mut stream = loopback_connector(NetConfig::default())
        .connect(ConnectRequest::host(Protocol::Tcp, "127.0.0.1").with_port(port))
        .unwrap();
    assert!(stream.local_addr().is_some());
    stream.write_all_flush(b"hello").unwrap();
    assert_eq!(read_exactly(&mut stream, 5), b"world");
    stream.disconnect();

    assert_eq!(&server.join().unwrap(), b"hello");
}

#[test]
fn test_loopback_listen_echo() {
    let mut stream = loopback_connector(NetConfig::default())
        .listen(
            ConnectRequest::host(Protocol::Tcp, "127.0.0.1")
                .with_connect_timeout(ci_timeout(Duration::from_secs(10))),
        )
        .unwrap();
    let addr = stream.local_addr().unwrap();
    assert!(stream.flags().is_server());

    let client = thread::spawn(move || {
        let mut sock = TcpStream::connect(addr).unwrap();
        sock.write_all(b"ping").unwrap();
        let mut reply = [0u8; 4];
        sock.read_exact(&mut reply).unwrap();
        reply
    });

    let message = read_exactly(&mut stream, 4);
    stream.write_all_flush(&message).unwrap();
    assert_eq!(&client.join().unwrap(), b"ping");
    stream.disconnect();
}

#[test]
fn test_connect_refused_on_loopback() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = loopback_connector(NetConfig::default())
        .connect(ConnectRequest::host(Protocol::Tcp, "127.0.0.1").with_port(port))
        .unwrap_err();
    assert!(matches!(err, NetError::Transport(_)), "{err}");
}

// ============================================================================
// Proxy Traversal
// ============================================================================

#[test]
fn test_http_connect_tunnel() {
    let proxy = http_connect_proxy("HTTP/1.1 200 Connection established", b"").unwrap();
    let config = NetConfig::default().with_http_proxy(proxy.url());

    let mut stream = loopback_connector(config)
        .connect(ConnectRequest::host(Protocol::Http, "example.com").with_port(80))
        .unwrap();
    stream
        .write_all_flush(b"GET /pkix/ HTTP/1.1\r\n\r\n")
        .unwrap();
    assert_eq!(read_exactly(&mut stream, 23), b"GET /pkix/ HTTP/1.1\r\n\r\n");
    stream.disconnect();

    assert_eq!(proxy.join().unwrap(), CONNECT_REQUEST);
}

#[test]
fn test_http_connect_keeps_early_data() {
    let proxy = http_connect_proxy("HTTP/1.0 200 OK", b"early").unwrap();
    let config = NetConfig::default().with_http_proxy(proxy.url());

    let mut stream = loopback_connector(config)
        .connect(ConnectRequest::host(Protocol::Http, "example.com").with_port(80))
        .unwrap();
    assert_eq!(read_exactly(&mut stream, 5), b"early");
    stream.disconnect();
    proxy.join().unwrap();
}

#[test]
fn test_http_connect_refused() {
    let proxy = http_connect_proxy("HTTP/1.1 407 Proxy Authentication Required", b"").unwrap();
    let config = NetConfig::default().with_http_proxy(proxy.url());

    let err = loopback_connector(config)
        .connect(ConnectRequest::host(Protocol::Http, "example.com").with_port(80))
        .unwrap_err();
    assert!(matches!(err, NetError::Open(ref m) if m.contains("407")), "{err}");
    proxy.join().unwrap();
}

#[test]
fn test_socks5_tunnel() {
    let proxy = socks5_proxy(0x00).unwrap();
    let config = NetConfig::default().with_socks_proxy(proxy.url());

    let mut stream = loopback_connector(config)
        .connect(ConnectRequest::host(Protocol::Tcp, "pki.example.com").with_port(829))
        .unwrap();
    stream.write_all_flush(b"ping").unwrap();
    assert_eq!(read_exactly(&mut stream, 4), b"ping");
    stream.disconnect();

    let mut expected = vec![0x05, 0x01, 0x00, 0x03, 15];
    expected.extend_from_slice(b"pki.example.com");
    expected.extend_from_slice(&829u16.to_be_bytes());
    assert_eq!(proxy.join().unwrap(), expected);
}

#[test]
fn test_socks5_refused() {
    let proxy = socks5_proxy(0x05).unwrap();
    let config = NetConfig::default().with_socks_proxy(proxy.url());

    let err = loopback_connector(config)
        .connect(ConnectRequest::host(Protocol::Tcp, "pki.example.com").with_port(829))
        .unwrap_err();
    assert!(err.to_string().contains("connection refused"), "{err}");
    proxy.join().unwrap();
}

// ============================================================================
// Caller-Supplied Substrates
// ============================================================================

#[test]
fn test_user_socket_survives_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let socket = TcpStream::connect(addr).unwrap();
    let mut ours = socket.try_clone().unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    let mut stream = loopback_connector(NetConfig::default())
        .connect(ConnectRequest::new(
            Protocol::Tcp,
            ConnectOptions::NetworkSocketCheck(socket),
        ))
        .unwrap();
    assert!(stream.flags().is_user_socket());
    stream.write_all_flush(b"one").unwrap();
    stream.disconnect();

    // Still usable by its owner
    ours.write_all(b"two").unwrap();
    let mut received = [0u8; 6];
    peer.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"onetwo");
}

/// Session that echoes what it is given
#[derive(Default)]
struct EchoSession {
    active: bool,
    queued: Vec<u8>,
    sent: Vec<u8>,
}

impl SecureSession for EchoSession {
    fn is_active(&self) -> bool {
        self.active
    }

    fn activate(&mut self) -> TransportResult<()> {
        self.active = true;
        Ok(())
    }

    fn push_data(&mut self, data: &[u8]) -> TransportResult<usize> {
        self.queued.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.sent.append(&mut self.queued);
        Ok(())
    }

    fn pop_data(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let n = buf.len().min(self.sent.len());
        buf[..n].copy_from_slice(&self.sent[..n]);
        self.sent.drain(..n);
        Ok(n)
    }

    fn set_read_timeout(&mut self, _timeout: Duration) {}

    fn error_message(&self) -> Option<String> {
        None
    }

    fn close(&mut self) {
        self.active = false;
    }
}

#[test]
fn test_session_substrate() {
    let mut stream = loopback_connector(NetConfig::default())
        .connect(ConnectRequest::new(
            Protocol::Http,
            ConnectOptions::TransportSession(Box::new(EchoSession::default())),
        ))
        .unwrap();
    assert_eq!(stream.buffered_len(), 0);

    stream.write_all_flush(b"PKIMessage").unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(stream.read(&mut buf).unwrap(), 10);
    assert_eq!(&buf, b"PKIMessage");
    stream.disconnect();
}
