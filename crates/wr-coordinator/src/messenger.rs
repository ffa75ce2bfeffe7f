//! Best-effort notifications to agents
//!
//! Every send returns a [`SendOutcome`]; failures are logged here and never
//! fail the operation that triggered them.

use std::sync::Arc;

use wr_core::model::Client;
use wr_core::traits::{MeshStore, PeerBus, SendOutcome};
use wr_core::SiteId;
use wr_protocol::{
    ClientPeerUpdate, Envelope, OutboundMessage, PeerId, SitePeer, SitePeerRemove,
    SitePeerUpdate,
};

/// Resolves sites and clients to bus peers and sends to them
#[derive(Clone)]
pub struct PeerMessenger {
    bus: Arc<dyn PeerBus>,
    store: Arc<dyn MeshStore>,
}

impl PeerMessenger {
    pub fn new(bus: Arc<dyn PeerBus>, store: Arc<dyn MeshStore>) -> Self {
        Self { bus, store }
    }

    pub async fn send_to_peer(&self, peer: &PeerId, message: OutboundMessage) -> SendOutcome {
        let message_type = message.message_type();
        let outcome = SendOutcome::from(self.bus.send(peer, message).await);

        match &outcome {
            SendOutcome::Sent => tracing::debug!(%peer, message_type, "Sent"),
            SendOutcome::Failed(reason) => {
                tracing::warn!(%peer, message_type, "Notification failed: {}", reason)
            }
        }
        outcome
    }

    /// Send to the site agent currently bound to `site_id`
    pub async fn send_to_site(&self, site_id: SiteId, message: OutboundMessage) -> SendOutcome {
        let newt = match self.store.newt_for_site(site_id).await {
            Ok(Some(newt)) => newt,
            Ok(None) => return self.unreachable("site", site_id, "no agent bound"),
            Err(e) => return self.unreachable("site", site_id, &e.to_string()),
        };

        self.send_to_peer(&PeerId::new(newt.newt_id), message).await
    }

    /// Send to the client agent owning `client`
    pub async fn send_to_client(&self, client: &Client, message: OutboundMessage) -> SendOutcome {
        match &client.olm_id {
            Some(olm_id) => self.send_to_peer(&PeerId::new(olm_id.clone()), message).await,
            None => self.unreachable("client", client.client_id, "no agent bound"),
        }
    }

    pub async fn add_site_peer(&self, site_id: SiteId, peer: SitePeer) -> SendOutcome {
        self.send_to_site(site_id, OutboundMessage::SitePeerAdd(peer))
            .await
    }

    pub async fn update_site_peer(&self, site_id: SiteId, update: SitePeerUpdate) -> SendOutcome {
        self.send_to_site(site_id, OutboundMessage::SitePeerUpdate(update))
            .await
    }

    pub async fn remove_site_peer(&self, site_id: SiteId, public_key: &str) -> SendOutcome {
        let message = OutboundMessage::SitePeerRemove(SitePeerRemove {
            public_key: public_key.to_string(),
        });
        self.send_to_site(site_id, message).await
    }

    pub async fn update_client_peer(
        &self,
        client: &Client,
        update: ClientPeerUpdate,
    ) -> SendOutcome {
        self.send_to_client(client, OutboundMessage::ClientPeerUpdate(update))
            .await
    }

    fn unreachable(&self, kind: &str, id: impl std::fmt::Display, reason: &str) -> SendOutcome {
        tracing::warn!("Cannot notify {} {}: {}", kind, id, reason);
        SendOutcome::Failed(format!("{kind} {id}: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PeerConnections;
    use wr_core::memory::Snapshot;
    use wr_core::model::Newt;
    use wr_core::{ClientId, MemoryStore, OrgId};
    use wr_protocol::PeerKind;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(Snapshot {
            newts: vec![Newt {
                newt_id: "newt-1".into(),
                site_id: Some(SiteId::new(1)),
                token_digest: String::new(),
            }],
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_send_to_site_resolves_agent() {
        let bus = Arc::new(PeerConnections::new());
        let mut rx = bus.connect(PeerId::new("newt-1"), PeerKind::Site);
        let messenger = PeerMessenger::new(bus, store());

        let outcome = messenger.remove_site_peer(SiteId::new(1), "old").await;
        assert!(outcome.is_sent());
        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundMessage::SitePeerRemove(SitePeerRemove {
                public_key: "old".into()
            })
        );
    }

    #[tokio::test]
    async fn test_unbound_site_and_client_fail_without_error() {
        let messenger = PeerMessenger::new(Arc::new(PeerConnections::new()), store());

        let outcome = messenger.remove_site_peer(SiteId::new(9), "k").await;
        assert!(matches!(outcome, SendOutcome::Failed(_)));

        let client = Client {
            client_id: ClientId::new(1),
            org_id: OrgId::new("org"),
            name: "laptop".into(),
            user_id: None,
            olm_id: None,
            public_key: None,
            subnet: "100.90.128.2/24".into(),
            last_hole_punch: None,
        };
        let update = ClientPeerUpdate {
            site_id: 1,
            public_key: "sk".into(),
            endpoint: "203.0.113.9:51820".into(),
            relay_endpoint: None,
            server_ip: None,
            server_port: None,
            remote_subnets: None,
        };
        assert!(!messenger.update_client_peer(&client, update).await.is_sent());
    }

    #[tokio::test]
    async fn test_disconnected_agent_fails() {
        let messenger = PeerMessenger::new(Arc::new(PeerConnections::new()), store());
        let outcome = messenger.remove_site_peer(SiteId::new(1), "k").await;
        assert!(matches!(outcome, SendOutcome::Failed(reason) if reason.contains("newt-1")));
    }
}
