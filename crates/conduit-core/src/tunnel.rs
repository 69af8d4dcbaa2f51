//! Proxy traversal handshakes.
//!
//! After the raw connect to a proxy succeeds, the proxy has to be told where
//! the connection is really going: an HTTP `CONNECT` request for HTTP
//! proxies, a SOCKS5 `CONNECT` command for SOCKS proxies.

use crate::MAX_PROXY_RESPONSE;
use crate::error::{NetError, NetResult};
use crate::stream::NetStream;
use conduit_transport::{Transport, TransportFlags};
use std::net::IpAddr;
use tracing::{debug, warn};

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_NO_AUTH: u8 = 0x00;
const SOCKS_NO_ACCEPTABLE_METHOD: u8 = 0xFF;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

/// `host:port`, bracketing IPv6 literals
fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Ask an HTTP proxy to open a tunnel to `host:port`.
///
/// The response header is read a byte at a time through the stream's
/// read-ahead, so anything the proxy sends after the header stays buffered
/// for the protocol layer.
///
/// # Errors
///
/// Returns `NetError::Open` if the proxy refuses or answers with something
/// that isn't an HTTP 200 response, or the transport error if the exchange
/// fails.
pub fn connect_via_http_proxy(stream: &mut NetStream, host: &str, port: u16) -> NetResult<()> {
    let target = authority(host, port);
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    debug!("Requesting HTTP proxy tunnel to {}", target);
    stream.write_all_flush(request.as_bytes())?;

    let mut header = Vec::with_capacity(256);
    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_PROXY_RESPONSE {
            return Err(NetError::Open("HTTP proxy response header too long".into()));
        }
        let mut byte = [0u8; 1];
        stream.read(&mut byte)?;
        header.push(byte[0]);
    }

    let status_line = header
        .split(|&b| b == b'\r')
        .next()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let accepted = ["HTTP/1.1 200", "HTTP/1.0 200"].iter().any(|ok| {
        status_line.starts_with(ok)
            && status_line
                .as_bytes()
                .get(ok.len())
                .is_none_or(|&b| b == b' ')
    });
    if !accepted {
        warn!("HTTP proxy refused tunnel to {}: {}", target, status_line);
        return Err(NetError::Open(format!(
            "HTTP proxy connect failed: {status_line}"
        )));
    }
    debug!("HTTP proxy tunnel to {} established", target);
    Ok(())
}

/// Ask a SOCKS5 proxy to connect to `host:port`, without authentication.
///
/// # Errors
///
/// Returns `NetError::Open` describing the proxy's refusal, or the transport
/// error if the exchange fails.
pub fn connect_via_socks_proxy(
    transport: &mut dyn Transport,
    host: &str,
    port: u16,
) -> NetResult<()> {
    write_all(transport, &[SOCKS_VERSION, 1, SOCKS_NO_AUTH])?;
    let mut greeting = [0u8; 2];
    read_full(transport, &mut greeting)?;
    match greeting {
        [SOCKS_VERSION, SOCKS_NO_AUTH] => {}
        [SOCKS_VERSION, SOCKS_NO_ACCEPTABLE_METHOD] => {
            return Err(NetError::Open("SOCKS proxy requires authentication".into()));
        }
        _ => return Err(NetError::Open("Invalid SOCKS proxy response".into())),
    }

    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len())
                .map_err(|_| NetError::Open("SOCKS target host name too long".into()))?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    debug!("Requesting SOCKS connect to {}", authority(host, port));
    write_all(transport, &request)?;

    let mut reply = [0u8; 4];
    read_full(transport, &mut reply)?;
    if reply[0] != SOCKS_VERSION {
        return Err(NetError::Open("Invalid SOCKS proxy response".into()));
    }
    if reply[1] != 0x00 {
        let reason = match reply[1] {
            0x01 => "general SOCKS server failure",
            0x02 => "connection not allowed by ruleset",
            0x03 => "network unreachable",
            0x04 => "host unreachable",
            0x05 => "connection refused",
            0x06 => "TTL expired",
            0x07 => "command not supported",
            0x08 => "address type not supported",
            _ => "unknown error",
        };
        warn!("SOCKS proxy refused connect: {}", reason);
        return Err(NetError::Open(format!("SOCKS proxy connect failed: {reason}")));
    }

    // Skip the bound address the proxy reports
    let addr_len = match reply[3] {
        SOCKS_ATYP_IPV4 => 4,
        SOCKS_ATYP_IPV6 => 16,
        SOCKS_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            read_full(transport, &mut len)?;
            usize::from(len[0])
        }
        _ => return Err(NetError::Open("Invalid SOCKS proxy response".into())),
    };
    let mut bound = vec![0u8; addr_len + 2];
    read_full(transport, &mut bound)?;
    Ok(())
}

fn write_all(transport: &mut dyn Transport, mut data: &[u8]) -> NetResult<()> {
    while !data.is_empty() {
        let written = transport.write(data, TransportFlags::NONE)?;
        if written == 0 {
            return Err(NetError::Open("SOCKS proxy stopped accepting data".into()));
        }
        data = &data[written..];
    }
    Ok(())
}

fn read_full(transport: &mut dyn Transport, buf: &mut [u8]) -> NetResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        filled += transport.read(&mut buf[filled..], TransportFlags::BLOCKING)?;
    }
    Ok(())
}
