//! Connection defaults consulted when a request leaves a value unset.

use crate::error::{NetError, NetResult};
use crate::{
    DEFAULT_NET_TIMEOUT, MAX_BUFFER_SIZE, MAX_NETWORK_TIMEOUT, MAX_URL_SIZE, NETWORK_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sentinel proxy setting asking for the proxy to be discovered
pub const AUTODETECT_PROXY: &str = "[Autodetect]";

/// Network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Connect-phase timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout: u64,
    /// Data-phase timeout in seconds
    #[serde(default = "default_timeout")]
    pub read_timeout: u64,
    /// HTTP proxy URL or `"[Autodetect]"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    /// SOCKS proxy URL or `"[Autodetect]"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_proxy: Option<String>,
    /// Read-ahead and write-assembly buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

// Default values

fn default_timeout() -> u64 {
    DEFAULT_NET_TIMEOUT.as_secs()
}

fn default_buffer_size() -> usize {
    NETWORK_BUFFER_SIZE
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_timeout(),
            read_timeout: default_timeout(),
            http_proxy: None,
            socks_proxy: None,
            buffer_size: default_buffer_size(),
        }
    }
}

impl NetConfig {
    /// Set the HTTP proxy
    #[must_use]
    pub fn with_http_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.http_proxy = Some(proxy.into());
        self
    }

    /// Set the SOCKS proxy
    #[must_use]
    pub fn with_socks_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.socks_proxy = Some(proxy.into());
        self
    }

    /// Default connect-phase timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Default data-phase timeout
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    /// Configured HTTP proxy, an empty string counting as unset
    #[must_use]
    pub fn http_proxy(&self) -> Option<&str> {
        self.http_proxy.as_deref().filter(|p| !p.is_empty())
    }

    /// Configured SOCKS proxy, an empty string counting as unset
    #[must_use]
    pub fn socks_proxy(&self) -> Option<&str> {
        self.socks_proxy.as_deref().filter(|p| !p.is_empty())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `NetError::BadData` naming the first invalid setting.
    pub fn validate(&self) -> NetResult<()> {
        let max_timeout = MAX_NETWORK_TIMEOUT.as_secs();
        if self.connect_timeout > max_timeout {
            return Err(NetError::BadData(format!(
                "Connect timeout must be at most {max_timeout} seconds"
            )));
        }
        if self.read_timeout > max_timeout {
            return Err(NetError::BadData(format!(
                "Read timeout must be at most {max_timeout} seconds"
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(NetError::BadData(format!(
                "Buffer size must be between 1 and {MAX_BUFFER_SIZE} bytes"
            )));
        }
        for (name, proxy) in [("HTTP", self.http_proxy()), ("SOCKS", self.socks_proxy())] {
            if proxy.is_some_and(|p| p.len() > MAX_URL_SIZE) {
                return Err(NetError::BadData(format!("{name} proxy URL is too long")));
            }
        }
        Ok(())
    }
}
