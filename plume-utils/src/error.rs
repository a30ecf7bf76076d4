//! Error types for plume
//!
//! Provides a unified error type used across all plume crates.

/// Main error type for plume operations
#[derive(Debug, thiserror::Error)]
pub enum PlumeError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Connection Errors ===

    /// The initial dial attempt failed, or the connection was torn down
    /// before the handshake completed. Fatal; never retried internally.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection, or a read/write failed after a
    /// successful dial. Fatal to the affected loop.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    // === Protocol Errors ===

    #[error("protocol error: {0}")]
    Protocol(String),

    // === Caller Errors ===

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // === Internal Errors ===

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlumeError {
    /// Create a connection-failed error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Create a stream-closed error
    pub fn stream_closed(msg: impl Into<String>) -> Self {
        Self::StreamClosed(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error ends the connection (as opposed to rejecting a
    /// single call)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidArgument(_))
    }
}

/// Result type alias using PlumeError
pub type Result<T> = std::result::Result<T, PlumeError>;
