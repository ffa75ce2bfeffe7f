//! Shared mesh fixture for unit tests

use std::sync::Arc;

use tokio::sync::mpsc;

use wr_core::memory::{token_digest, Snapshot};
use wr_core::model::Association;
use wr_core::{ClientId, MemoryStore, SiteId};
use wr_protocol::{OutboundMessage, PeerId, PeerKind};

use crate::association::AssociationCache;
use crate::connection::PeerConnections;
use crate::messenger::PeerMessenger;

pub const OLM_TOKEN: &str = "olm-secret";
pub const NEWT_TOKEN: &str = "newt-secret";
pub const CLIENT_ENDPOINT: &str = "198.51.100.7:40000";
pub const SITE_ENDPOINT: &str = "203.0.113.5:51820";

/// One org, one exit node, one newt site and one client linked to it.
/// Both agents punched at `now`.
pub fn snapshot(now: i64) -> Snapshot {
    serde_json::from_value(serde_json::json!({
        "orgs": [{ "orgId": "acme", "name": "Acme", "subnet": "100.90.128.0/24",
                   "utilitySubnet": "100.96.128.0/24" }],
        "exitNodes": [{ "exitNodeId": 1, "name": "edge", "publicKey": "exit-pk",
                        "endpoint": "edge.example.com" }],
        "sites": [{ "siteId": 1, "orgId": "acme", "name": "home", "type": "newt",
                    "subnet": "100.89.128.4/30", "address": "100.89.128.5",
                    "endpoint": SITE_ENDPOINT, "publicKey": "site-pk",
                    "listenPort": 51820, "exitNodeId": 1, "online": true,
                    "lastHolePunch": now }],
        "clients": [{ "clientId": 1, "orgId": "acme", "name": "laptop",
                      "olmId": "olm-1", "publicKey": "client-pk",
                      "subnet": "100.90.128.2/24", "lastHolePunch": now }],
        "olms": [{ "olmId": "olm-1", "clientId": 1, "tokenDigest": token_digest(OLM_TOKEN) }],
        "newts": [{ "newtId": "newt-1", "siteId": 1, "tokenDigest": token_digest(NEWT_TOKEN) }],
        "clientSites": [{ "clientId": 1, "siteId": 1 }]
    }))
    .unwrap()
}

/// Store, bus and cache shared by the orchestrators under test
pub struct Mesh {
    pub store: Arc<MemoryStore>,
    pub connections: Arc<PeerConnections>,
    pub associations: Arc<AssociationCache>,
}

impl Mesh {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(snapshot)),
            connections: Arc::new(PeerConnections::new()),
            associations: Arc::new(AssociationCache::new()),
        }
    }

    pub fn messenger(&self) -> PeerMessenger {
        PeerMessenger::new(self.connections.clone(), self.store.clone())
    }

    pub fn connect_site(&self) -> mpsc::Receiver<OutboundMessage> {
        self.connections.connect(PeerId::new("newt-1"), PeerKind::Site)
    }

    pub fn connect_client(&self) -> mpsc::Receiver<OutboundMessage> {
        self.connections.connect(PeerId::new("olm-1"), PeerKind::Client)
    }

    /// Cache the client as punched through to the site
    pub fn associate(&self, relayed: bool) {
        let mut row = Association::new(ClientId::new(1), SiteId::new(1));
        row.endpoint = Some(CLIENT_ENDPOINT.to_string());
        row.public_key = Some("client-pk".to_string());
        row.is_relayed = relayed;
        self.associations.load([row]);
    }
}

/// Everything queued for a peer so far
pub fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
