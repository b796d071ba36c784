use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the request/reply layer.
///
/// Only [`RpcError::Remote`] and [`RpcError::Timeout`] are expected to reach
/// business code in normal operation. The remaining variants describe
/// infrastructure failures and are mostly observed through logs.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No reply arrived within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote handler ran and rejected the request.
    #[error("remote handler failed: {0}")]
    Remote(String),

    /// Broker connection, publish, or subscribe failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A wire envelope could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// No handler is registered for the message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// JSON serialization or deserialization of a typed payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not supported by the node's mode.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A waiter is already registered under this correlation ID.
    #[error("correlation id already registered: {0}")]
    DuplicateCorrelationId(String),

    /// The outbound queue is full and the caller asked to fail fast.
    #[error("outbound queue full")]
    Backpressure,

    /// The outbound multiplexer is gone; the node has been shut down.
    #[error("node is shut down")]
    Shutdown,
}

impl RpcError {
    /// True for [`RpcError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }

    /// True for [`RpcError::Remote`].
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
