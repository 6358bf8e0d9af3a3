//! Error types for the Fairmocracy sync client.

use thiserror::Error;

/// Errors that can occur when using the Fairmocracy sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to receive a message from the push channel.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The push channel connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to establish the push channel connection.
    #[error("transport connect error: {0}")]
    TransportConnect(String),

    /// An HTTP request failed before a response was received.
    #[cfg(any(feature = "transport-sse", feature = "http-api"))]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status code.
    #[error("server responded with status {status} for {url}")]
    HttpStatus {
        /// Numeric HTTP status code.
        status: u16,
        /// URL that was requested.
        url: String,
    },

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required configuration value is missing.
    #[error("missing configuration value: {var}")]
    MissingConfig {
        /// Name of the missing environment variable.
        var: &'static str,
    },

    /// Attempted an operation that requires the sync loop, but it has exited.
    #[error("sync loop is not running")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred while reading or writing durable storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Fairmocracy client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
