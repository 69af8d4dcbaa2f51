//! URL parsing for connection targets and proxy settings.
//!
//! Accepts `[scheme://][userinfo@]host[:port][/path][?query]`. IPv6 literals
//! are written in brackets, or bare when no port is given.

use crate::error::{NetError, NetResult};
use crate::{MAX_HOST_SIZE, MAX_LOCATION_SIZE, MAX_URL_SIZE, MIN_HOST_SIZE, MIN_LOCATION_SIZE};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Hint describing what kind of URL the caller expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlType {
    /// Any supported scheme
    #[default]
    None,
    /// Only `http://` or `https://` (or no scheme)
    Http,
}

/// Recognised URL schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    /// `http://`
    Http,
    /// `https://`
    Https,
    /// `tcp://`
    Tcp,
    /// `ssh://`
    Ssh,
    /// `cmp://`
    Cmp,
    /// `tsp://`
    Tsp,
    /// `scep://`
    Scep,
}

impl UrlScheme {
    fn from_name(name: &str) -> Option<Self> {
        let scheme = match name.to_ascii_lowercase().as_str() {
            "http" => Self::Http,
            "https" => Self::Https,
            "tcp" => Self::Tcp,
            "ssh" => Self::Ssh,
            "cmp" => Self::Cmp,
            "tsp" => Self::Tsp,
            "scep" => Self::Scep,
            _ => return None,
        };
        Some(scheme)
    }

    /// Port implied by the scheme when the URL gives none
    #[must_use]
    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::Http | Self::Scep => Some(80),
            Self::Https => Some(443),
            Self::Ssh => Some(22),
            Self::Cmp => Some(829),
            Self::Tsp => Some(318),
            Self::Tcp => None,
        }
    }

    /// Whether the scheme is acceptable for an HTTP-typed URL
    #[must_use]
    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

/// Parsed URL. Host, path and credentials are wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct UrlInfo {
    #[zeroize(skip)]
    scheme: Option<UrlScheme>,
    user_info: Option<String>,
    host: String,
    #[zeroize(skip)]
    port: Option<u16>,
    location: Option<String>,
}

impl UrlInfo {
    /// Scheme, if one was given
    #[must_use]
    pub fn scheme(&self) -> Option<UrlScheme> {
        self.scheme
    }

    /// `user[:password]` part, if present
    #[must_use]
    pub fn user_info(&self) -> Option<&str> {
        self.user_info.as_deref()
    }

    /// Host name or address, IPv6 literals without brackets
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, else the caller's default, else the scheme's
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Path and query, starting with `/`
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl fmt::Debug for UrlInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlInfo")
            .field("scheme", &self.scheme)
            .field("user_info", &self.user_info.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("location", &self.location)
            .finish()
    }
}

/// Parse a URL.
///
/// # Arguments
/// * `url` - Raw URL bytes
/// * `url_type` - What kind of URL is expected
///
/// # Errors
/// Returns `NetError::BadData` if the URL is malformed.
///
/// # Examples
/// ```
/// use conduit_core::url::{parse_url, UrlType};
///
/// let url = parse_url(b"http://ca.example.com:8080/pkix/?op=get", UrlType::Http).unwrap();
/// assert_eq!(url.host(), "ca.example.com");
/// assert_eq!(url.port(), Some(8080));
/// assert_eq!(url.location(), Some("/pkix/?op=get"));
/// ```
#[cfg(feature = "tcp")]
pub fn parse_url(url: &[u8], url_type: UrlType) -> NetResult<UrlInfo> {
    parse_url_with_default(url, None, url_type)
}

/// Parse a URL. Networking is not built in, so nothing is accepted.
///
/// # Errors
/// Always returns `NetError::BadData`.
#[cfg(not(feature = "tcp"))]
pub fn parse_url(_url: &[u8], _url_type: UrlType) -> NetResult<UrlInfo> {
    Err(NetError::BadData("Networking support not available".into()))
}

/// Parse a URL, filling in `default_port` when the URL carries no port.
///
/// # Errors
/// Returns `NetError::BadData` if the URL is malformed.
pub fn parse_url_with_default(
    url: &[u8],
    default_port: Option<u16>,
    url_type: UrlType,
) -> NetResult<UrlInfo> {
    if url.is_empty() || url.len() > MAX_URL_SIZE {
        return Err(bad("Invalid URL length"));
    }
    if !url.iter().all(|b| b.is_ascii_graphic()) {
        return Err(bad("URL contains invalid characters"));
    }
    let url = std::str::from_utf8(url).map_err(|_| bad("URL contains invalid characters"))?;

    let (scheme, rest) = match url.find("://") {
        Some(idx) => {
            let scheme =
                UrlScheme::from_name(&url[..idx]).ok_or_else(|| bad("Unknown URL scheme"))?;
            (Some(scheme), &url[idx + 3..])
        }
        None => (None, url),
    };
    if url_type == UrlType::Http && scheme.is_some_and(|s| !s.is_http()) {
        return Err(bad("URL scheme isn't HTTP"));
    }

    let (authority, location) = match rest.find(['/', '?']) {
        Some(idx) if rest.as_bytes()[idx] == b'?' => (&rest[..idx], Some(format!("/{}", &rest[idx..]))),
        Some(idx) => (&rest[..idx], Some(rest[idx..].to_string())),
        None => (rest, None),
    };

    let (user_info, host_port) = match authority.rfind('@') {
        Some(0) => return Err(bad("Empty URL user info")),
        Some(idx) => (Some(authority[..idx].to_string()), &authority[idx + 1..]),
        None => (None, authority),
    };

    let (host, port) = split_host_port(host_port)?;
    if host.len() < MIN_HOST_SIZE || host.len() > MAX_HOST_SIZE {
        return Err(bad("Invalid URL host name length"));
    }
    if let Some(location) = &location {
        if location.len() < MIN_LOCATION_SIZE || location.len() > MAX_LOCATION_SIZE {
            return Err(bad("Invalid URL location length"));
        }
    }

    Ok(UrlInfo {
        scheme,
        user_info,
        host: host.to_string(),
        port: port
            .or(default_port)
            .or_else(|| scheme.and_then(UrlScheme::default_port)),
        location,
    })
}

fn split_host_port(host_port: &str) -> NetResult<(&str, Option<u16>)> {
    if let Some(bracketed) = host_port.strip_prefix('[') {
        let end = bracketed
            .find(']')
            .ok_or_else(|| bad("Unterminated IPv6 address"))?;
        let host = &bracketed[..end];
        let tail = &bracketed[end + 1..];
        if tail.is_empty() {
            return Ok((host, None));
        }
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| bad("Invalid data after IPv6 address"))?;
        return Ok((host, Some(parse_port(port)?)));
    }

    match host_port.matches(':').count() {
        0 => Ok((host_port, None)),
        // Bare IPv6 literal
        n if n > 1 => Ok((host_port, None)),
        _ => {
            let (host, port) = host_port
                .split_once(':')
                .ok_or_else(|| bad("Invalid URL port"))?;
            Ok((host, Some(parse_port(port)?)))
        }
    }
}

fn parse_port(port: &str) -> NetResult<u16> {
    if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad("Invalid URL port"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(bad("Invalid URL port")),
        Ok(port) => Ok(port),
    }
}

fn bad(msg: &str) -> NetError {
    NetError::BadData(msg.to_string())
}
