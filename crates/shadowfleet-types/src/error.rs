//! Shared error types.

use thiserror::Error;

/// Failure reported by a [`Messenger`](crate::message::Messenger).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The transport has shut down and will not accept more messages.
    #[error("Messenger closed")]
    Closed,

    /// The transport rejected the message.
    #[error("Send failed: {0}")]
    Transport(String),
}

/// Configuration could not be read or is invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
