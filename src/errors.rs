//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

use crate::protocol::{INTERNAL_ERROR, INVALID_REQUEST};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all bridge failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The peer process could not be started.
    Spawn(String),
    /// HTTP listener bind or serve failure.
    Http(String),
    /// A line from the peer could not be framed or decoded.
    Codec(String),
    /// File-system or stream I/O failure.
    Io(String),
    /// The peer has exited or its streams are gone.
    ChannelClosed(String),
    /// No response arrived from the peer before the deadline.
    Timeout(String),
    /// A request with the same id is already in flight.
    DuplicateId(String),
    /// The inbound body is JSON but not a usable JSON-RPC request.
    InvalidRequest(String),
}

impl AppError {
    /// JSON-RPC error code reported to the HTTP caller for this error.
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) | Self::DuplicateId(_) => INVALID_REQUEST,
            _ => INTERNAL_ERROR,
        }
    }

    /// Message placed in the JSON-RPC error envelope.
    ///
    /// Timeouts and closed channels use fixed messages so callers can match
    /// on them; the detail is kept for logs only.
    #[must_use]
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Timeout(_) => "Request timeout".to_owned(),
            Self::ChannelClosed(_) => "Subprocess channel closed".to_owned(),
            Self::DuplicateId(_) => "Duplicate request id".to_owned(),
            Self::InvalidRequest(msg) => format!("Invalid Request: {msg}"),
            _ => "Internal error".to_owned(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::ChannelClosed(msg) => write!(f, "channel closed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::DuplicateId(msg) => write!(f, "duplicate id: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
