//! Message-bus abstraction

use async_trait::async_trait;
use std::fmt;

use crate::error::BusError;
use wr_protocol::{OutboundMessage, PeerId};

/// Per-peer ordered delivery of outbound envelopes
#[async_trait]
pub trait PeerBus: Send + Sync {
    /// Queue a message for one peer without waiting on a slow receiver
    async fn send(&self, peer: &PeerId, message: OutboundMessage) -> Result<(), BusError>;

    /// Whether the peer currently has a live channel
    fn is_connected(&self, peer: &PeerId) -> bool;
}

/// Result of a best-effort notification.
///
/// Callers log a `Failed` outcome; it never fails the operation that
/// triggered the notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed(String),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Sent => write!(f, "sent"),
            SendOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl From<Result<(), BusError>> for SendOutcome {
    fn from(result: Result<(), BusError>) -> Self {
        match result {
            Ok(()) => SendOutcome::Sent,
            Err(e) => SendOutcome::Failed(e.to_string()),
        }
    }
}
