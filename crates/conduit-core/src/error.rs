//! Error types for the CONDUIT network stream layer.

use crate::MAX_ERRMSG_SIZE;
use conduit_transport::TransportError;
use thiserror::Error;
use zeroize::Zeroize;

/// Network stream errors
#[derive(Debug, Error)]
pub enum NetError {
    /// Contract violation inside the stream layer or by its caller
    #[error("internal error: {0}")]
    Internal(String),

    /// Connection could not be opened
    #[error("{0}")]
    Open(String),

    /// Malformed URL or other input data
    #[error("{0}")]
    BadData(String),

    /// Raw transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Transport refused data handed to it for sending
    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    /// Networking subsystem not initialised
    #[error("{0}")]
    NotInitialized(String),

    /// Requested capability is not built in
    #[error("{0}")]
    NotAvailable(String),
}

impl NetError {
    /// Numeric status code for this error
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Internal(_) => ErrorCode::Internal,
            Self::Open(_) => ErrorCode::Open,
            Self::BadData(_) => ErrorCode::BadData,
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::NotAvailable(_) => ErrorCode::NotAvailable,
            Self::Write(_) => ErrorCode::Write,
            Self::Transport(e) => match e {
                TransportError::Timeout => ErrorCode::Timeout,
                TransportError::Closed | TransportError::PartialRead { .. } => ErrorCode::Read,
                TransportError::PartialWrite { .. } => ErrorCode::Write,
                TransportError::NotConnected => ErrorCode::NotInitialized,
                TransportError::InvalidConfig(_) => ErrorCode::BadData,
                _ => ErrorCode::Open,
            },
        }
    }

    /// Classify a failure on the send path. Timeouts keep their own code,
    /// anything else is a write error.
    #[must_use]
    pub fn on_write(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Transport(err),
            err => Self::Write(err),
        }
    }
}

/// Result type for network stream operations
pub type NetResult<T> = Result<T, NetError>;

/// Numeric status codes reported alongside error strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ErrorCode {
    /// No error
    #[default]
    Ok = 0,
    /// Subsystem not initialised
    NotInitialized = -11,
    /// Internal consistency failure
    Internal = -16,
    /// Capability not available
    NotAvailable = -20,
    /// Operation timed out
    Timeout = -25,
    /// Bad input data
    BadData = -32,
    /// Open failed
    Open = -40,
    /// Read failed
    Read = -41,
    /// Write failed
    Write = -42,
}

impl ErrorCode {
    /// Raw numeric value
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Last error recorded for a stream: a status code and a bounded message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    code: ErrorCode,
    message: String,
}

impl ErrorInfo {
    /// Empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record built from an error, message truncated to `MAX_ERRMSG_SIZE`
    #[must_use]
    pub fn from_error(err: &NetError) -> Self {
        let mut info = Self::new();
        info.set(err.code(), &err.to_string());
        info
    }

    /// Replace the record
    pub fn set(&mut self, code: ErrorCode, message: &str) {
        self.message.zeroize();
        self.code = code;
        self.message.push_str(truncate(message, MAX_ERRMSG_SIZE));
    }

    /// Replace only the message, keeping the code
    pub fn set_message(&mut self, message: &str) {
        let code = self.code;
        self.set(code, message);
    }

    /// Reset to "no error", wiping the old message
    pub fn clear(&mut self) {
        self.message.zeroize();
        self.code = ErrorCode::Ok;
    }

    /// Status code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Message text, empty when nothing is recorded
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether an error is recorded
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.code != ErrorCode::Ok
    }
}

impl Zeroize for ErrorInfo {
    fn zeroize(&mut self) {
        self.clear();
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
