//! Core error types for warren

use std::path::PathBuf;

use thiserror::Error;
use wr_protocol::ProtocolError;

/// Error taxonomy shared by the orchestration handlers and the monitor loop.
///
/// Handlers never retry: `Unauthorized`, `NotFound` and `Validation` drop the
/// message; `TransientIo` skips a monitoring sub-step until the next cycle.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Session token missing, invalid, or issued to a different peer
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced peer, site, exit node or org does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Inbound payload was well-formed but semantically unusable
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Filesystem or remote-fetch failure inside a monitoring cycle
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// Backing store rejected a read or update
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    /// Shorthand for [`MeshError::NotFound`]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Delivery failures at the message-bus boundary
#[derive(Error, Debug)]
pub enum BusError {
    /// No live channel for this peer
    #[error("Peer not connected: {0}")]
    NotConnected(String),

    /// The peer's channel was closed while sending
    #[error("Channel closed for peer: {0}")]
    ChannelClosed(String),

    /// The peer is not draining its queue; the message was dropped
    #[error("Queue full for peer: {0}")]
    QueueFull(String),

    /// Envelope could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = MeshError::not_found("site", 42);
        assert_eq!(err.to_string(), "site not found: 42");
    }

    #[test]
    fn test_config_error_wraps_into_mesh_error() {
        let err: MeshError = ConfigError::Invalid("monitor_interval is zero".into()).into();
        assert!(matches!(err, MeshError::Config(ConfigError::Invalid(_))));
    }
}
