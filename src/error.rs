//! Error types for Chat Relay.

use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Delivery-status persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Chat channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("No known chat for recipient {recipient} on channel {name}")]
    UnknownRecipient { name: String, recipient: String },

    #[error("Channel {name} failed to start: {reason}")]
    Startup { name: String, reason: String },
}

/// Failure posting a record to a downstream HTTP endpoint.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Routing table lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Unknown routing key: {0}")]
    UnknownKey(String),
}

/// Per-item delivery failure inside a relay worker.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Response receiver errors, mapped onto HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// Malformed or incomplete payload (HTTP 400).
    #[error("Invalid data: {0}")]
    Invalid(String),

    /// Failure after validation passed (HTTP 500).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
