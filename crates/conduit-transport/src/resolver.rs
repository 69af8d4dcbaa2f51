//! Host name resolution seam.
//!
//! The transport drivers never resolve names themselves; they go through a
//! `Resolver` so that callers can substitute their own lookup (static host
//! tables, DNS-over-HTTPS, test fixtures).

use crate::transport::{TransportError, TransportResult};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::debug;

/// Turns a host name and port into connectable addresses
pub trait Resolver: Send + Sync {
    /// Resolve `host:port`.
    ///
    /// # Errors
    /// Returns `TransportError::Resolve` if the name yields no addresses.
    fn resolve(&self, host: &str, port: u16) -> TransportResult<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system's `getaddrinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> TransportResult<Vec<SocketAddr>> {
        // Bracketed IPv6 literals come through from URL parsing unbracketed
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| {
                debug!("Resolution of {} failed: {}", host, e);
                TransportError::Resolve(host.to_string())
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve(host.to_string()));
        }
        debug!("Resolved {} to {} address(es)", host, addrs.len());
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_numeric_ipv4() {
        let addrs = SystemResolver.resolve("127.0.0.1", 8080).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_numeric_ipv6() {
        let addrs = SystemResolver.resolve("::1", 443).unwrap();
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].is_ipv6());
        assert_eq!(addrs[0].port(), 443);
    }

    #[test]
    fn test_resolve_invalid_name() {
        let result = SystemResolver.resolve("no such host.invalid", 80);
        assert!(matches!(result, Err(TransportError::Resolve(_))));
    }
}
