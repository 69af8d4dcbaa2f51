//! Proxy detection.
//!
//! Decides whether a connection has to go through an HTTP or SOCKS proxy and
//! turns the configured proxy setting into an endpoint to dial.

use crate::config::{AUTODETECT_PROXY, NetConfig};
use crate::descriptor::Protocol;
use crate::error::{NetError, NetResult};
use crate::url::{UrlInfo, UrlType, parse_url_with_default};
use crate::HTTP_PROXY_DEFAULT_PORT;
use std::collections::HashMap;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// How traffic reaches the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// HTTP proxy relaying a named-host request
    HttpProxy,
    /// HTTP proxy asked explicitly for host-based routing
    HttpTunnel,
    /// SOCKS proxy
    Socks,
}

impl ProxyKind {
    /// Whether this is one of the HTTP proxy kinds
    #[must_use]
    pub fn is_http(self) -> bool {
        matches!(self, Self::HttpProxy | Self::HttpTunnel)
    }
}

/// A proxy that the connection must be routed through
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProxyRoute {
    #[zeroize(skip)]
    kind: ProxyKind,
    url: String,
}

impl ProxyRoute {
    /// Route through `url`
    #[must_use]
    pub fn new(kind: ProxyKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }

    /// Proxy kind
    #[must_use]
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// Configured proxy setting, possibly the autodetect sentinel
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the setting asks for proxy autodetection
    #[must_use]
    pub fn is_autodetect(&self) -> bool {
        self.url.eq_ignore_ascii_case(AUTODETECT_PROXY)
    }
}

/// Finds the proxy to use for a target when configured as `"[Autodetect]"`
pub trait ProxyDiscovery: Send + Sync {
    /// Proxy URL for connections to `target_host`, if one can be found
    fn find_proxy(&self, target_host: &str) -> Option<String>;
}

/// Discovery that never finds a proxy
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProxyDiscovery;

impl ProxyDiscovery for NoProxyDiscovery {
    fn find_proxy(&self, _target_host: &str) -> Option<String> {
        None
    }
}

/// Discovery from the conventional `*_proxy` environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvProxyDiscovery {
    fixed: Option<HashMap<String, String>>,
}

impl EnvProxyDiscovery {
    const VARS: [&'static str; 6] = [
        "https_proxy",
        "HTTPS_PROXY",
        "http_proxy",
        "HTTP_PROXY",
        "all_proxy",
        "ALL_PROXY",
    ];

    /// Read the process environment at lookup time
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed set of variables instead of the process environment
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fixed: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match &self.fixed {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }
}

impl ProxyDiscovery for EnvProxyDiscovery {
    fn find_proxy(&self, target_host: &str) -> Option<String> {
        let found = Self::VARS
            .iter()
            .filter_map(|name| self.lookup(name))
            .find(|value| !value.is_empty());
        if found.is_some() {
            debug!("Discovered proxy for {} from environment", target_host);
        }
        found
    }
}

/// Check whether `host` names the local machine.
///
/// Covers the whole IPv4 loopback /8, the IPv6 loopback and the
/// `localhost` names, compared case-insensitively.
#[must_use]
pub fn is_local_host(host: &str) -> bool {
    (host.len() > 4 && host.starts_with("127."))
        || host == "::1"
        || host.eq_ignore_ascii_case("localhost")
        || host.eq_ignore_ascii_case("localhost.")
}

/// Decide whether a connection to `host` needs a proxy.
///
/// HTTP proxies only apply to the HTTP protocol and are always consulted
/// before SOCKS. Local targets and datagram streams are never proxied.
/// `tunnel` marks a request for host-based routing through the HTTP proxy.
#[must_use]
pub fn detect_proxy(
    protocol: Protocol,
    host: &str,
    tunnel: bool,
    config: &NetConfig,
) -> Option<ProxyRoute> {
    if is_local_host(host) || protocol == Protocol::Udp {
        return None;
    }

    if protocol == Protocol::Http {
        if let Some(proxy) = config.http_proxy() {
            let kind = if tunnel {
                ProxyKind::HttpTunnel
            } else {
                ProxyKind::HttpProxy
            };
            return Some(ProxyRoute::new(kind, proxy));
        }
    }

    config
        .socks_proxy()
        .map(|proxy| ProxyRoute::new(ProxyKind::Socks, proxy))
}

/// Turn a proxy route into the endpoint to dial, expanding autodetection.
///
/// # Errors
///
/// Returns `NetError::Open` if autodetection fails or the proxy URL is
/// malformed.
pub fn resolve_proxy_endpoint(
    route: &ProxyRoute,
    target_host: &str,
    discovery: &dyn ProxyDiscovery,
) -> NetResult<UrlInfo> {
    let mut discovered = None;
    if route.is_autodetect() {
        let found = discovery
            .find_proxy(target_host)
            .ok_or_else(|| NetError::Open("Couldn't auto-detect HTTP proxy".into()))?;
        discovered = Some(found);
    }
    let url = discovered.as_deref().unwrap_or(route.url());

    let url_type = if route.kind().is_http() {
        UrlType::Http
    } else {
        UrlType::None
    };
    let result = parse_url_with_default(url.as_bytes(), Some(HTTP_PROXY_DEFAULT_PORT), url_type)
        .map_err(|_| {
            NetError::Open(if route.kind().is_http() {
                "Invalid HTTP proxy URL".into()
            } else {
                "Invalid SOCKS proxy URL".into()
            })
        });

    if let Some(mut found) = discovered {
        found.zeroize();
    }
    result
}
