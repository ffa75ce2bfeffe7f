//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding envelopes
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Envelope carried a `type` this side does not handle
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Envelope was well-formed JSON but the payload did not match its type
    #[error("Malformed {message_type} payload: {reason}")]
    MalformedPayload {
        message_type: String,
        reason: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
