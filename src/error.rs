//! Error types for sockwire.

use thiserror::Error;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SockwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Framing-level protocol violation (oversized frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame decoded to JSON but is not a valid request envelope.
    #[error("invalid-request")]
    InvalidRequest,

    /// A frame decoded to JSON but is not a valid response envelope.
    #[error("invalid-response")]
    InvalidResponse,

    /// Method discovery returned something other than a list of names.
    #[error("invalid-method-list-received")]
    InvalidMethodList,

    /// No method registered under the requested name.
    #[error("invalid-method: {0}")]
    MethodNotFound(String),

    /// The remote peer answered with a failure response.
    ///
    /// Carries the response's `data` payload, which is `null` when the
    /// server suppresses error details.
    #[error("remote call failed: {0}")]
    Remote(serde_json::Value),

    /// A live peer already owns the endpoint.
    #[error("socket-in-use")]
    SocketInUse,

    /// The endpoint exists but its state could not be determined.
    #[error("socket-unavailable")]
    SocketUnavailable,

    /// Connection closed while a call was in flight, or no connection open.
    #[error("connection closed")]
    ConnectionClosed,

    /// A call did not settle within the configured timeout.
    #[error("timeout")]
    Timeout,

    /// Outbound queue stayed full past the backpressure timeout.
    #[error("backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using SockwireError.
pub type Result<T> = std::result::Result<T, SockwireError>;
