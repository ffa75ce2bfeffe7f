//! In-process message bus
//!
//! Each connected agent gets a bounded channel; whatever owns the
//! receiving half (a stream connection, a test) drains it in order.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use wr_core::traits::PeerBus;
use wr_core::BusError;
use wr_protocol::{Envelope, OutboundMessage, PeerId, PeerKind};

/// Outbound queue depth per peer
pub const PEER_CHANNEL_CAPACITY: usize = 256;

struct PeerChannel {
    kind: PeerKind,
    tx: mpsc::Sender<OutboundMessage>,
}

/// Pool of connected agents indexed by peer id
#[derive(Default)]
pub struct PeerConnections {
    peers: DashMap<PeerId, PeerChannel>,
}

impl PeerConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and return the receiving half of its queue.
    ///
    /// A second registration under the same id replaces the first; the old
    /// receiver sees its channel close.
    pub fn connect(&self, peer: PeerId, kind: PeerKind) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        if self.peers.insert(peer.clone(), PeerChannel { kind, tx }).is_some() {
            tracing::info!(%peer, %kind, "Replaced existing connection");
        } else {
            tracing::info!(%peer, %kind, "Peer connected");
        }
        rx
    }

    pub fn disconnect(&self, peer: &PeerId) {
        if self.peers.remove(peer).is_some() {
            tracing::info!(%peer, "Peer disconnected");
        }
    }

    /// Remove the peer only if its channel is closed, i.e. no newer
    /// connection has taken over the id
    pub fn release(&self, peer: &PeerId) {
        if self
            .peers
            .remove_if(peer, |_, c| c.tx.is_closed())
            .is_some()
        {
            tracing::info!(%peer, "Peer disconnected");
        }
    }

    pub fn kind(&self, peer: &PeerId) -> Option<PeerKind> {
        self.peers.get(peer).map(|c| c.kind)
    }

    /// Connected peers of one kind
    pub fn peers(&self, kind: PeerKind) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[async_trait]
impl PeerBus for PeerConnections {
    async fn send(&self, peer: &PeerId, message: OutboundMessage) -> Result<(), BusError> {
        let tx = self
            .peers
            .get(peer)
            .map(|c| c.tx.clone())
            .ok_or_else(|| BusError::NotConnected(peer.to_string()))?;

        let message_type = message.message_type();
        tracing::debug!(%peer, message_type, "Queueing message");
        // Never wait on a receiver: a stalled agent must not block the
        // handler that is notifying it
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => {
                tracing::warn!(%peer, message_type, "Peer queue full, dropping message");
                BusError::QueueFull(peer.to_string())
            }
            TrySendError::Closed(_) => BusError::ChannelClosed(peer.to_string()),
        })
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(|c| !c.tx.is_closed())
    }
}
