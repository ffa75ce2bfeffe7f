//! In-memory store backed by a JSON snapshot
//!
//! Stands in for the relational store in tests and single-process
//! deployments. All state lives behind one async `RwLock`, so every update
//! below is atomic with respect to concurrent handlers.

use std::path::Path;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::MeshError;
use crate::model::{
    Client, Domain, ExitNode, LoginPage, Newt, Olm, Org, Resource, ResourceTargetRow, Site,
    SitePatch, SiteResource, Target, User,
};
use crate::net::next_available_address;
use crate::traits::{MeshStore, ProxyStore, SessionValidator, Updated};
use crate::types::{ClientId, ExitNodeId, OrgId, SiteId, TransportProtocol, UserId};

/// SHA-256 hex digest of a session token
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Client-to-site link row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSiteLink {
    pub client_id: ClientId,
    pub site_id: SiteId,
}

/// Full contents of the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub orgs: Vec<Org>,
    pub exit_nodes: Vec<ExitNode>,
    pub sites: Vec<Site>,
    pub clients: Vec<Client>,
    pub olms: Vec<Olm>,
    pub newts: Vec<Newt>,
    pub users: Vec<User>,
    pub client_sites: Vec<ClientSiteLink>,
    pub site_resources: Vec<SiteResource>,
    pub resources: Vec<Resource>,
    pub targets: Vec<Target>,
    pub domains: Vec<Domain>,
    pub login_pages: Vec<LoginPage>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Load a JSON snapshot from disk
    pub async fn load(path: &Path) -> Result<Self, MeshError> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| MeshError::Store(format!("invalid snapshot {}: {}", path.display(), e)))?;

        info!(
            sites = snapshot.sites.len(),
            clients = snapshot.clients.len(),
            resources = snapshot.resources.len(),
            "Loaded mesh snapshot from {}",
            path.display()
        );
        Ok(Self::new(snapshot))
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    /// Replace the whole state, e.g. after an external reload
    pub async fn replace(&self, snapshot: Snapshot) {
        *self.state.write().await = snapshot;
    }
}

#[async_trait]
impl MeshStore for MemoryStore {
    async fn org(&self, org_id: &OrgId) -> Result<Option<Org>, MeshError> {
        let state = self.state.read().await;
        Ok(state.orgs.iter().find(|o| &o.org_id == org_id).cloned())
    }

    async fn olm(&self, olm_id: &str) -> Result<Option<Olm>, MeshError> {
        let state = self.state.read().await;
        Ok(state.olms.iter().find(|o| o.olm_id == olm_id).cloned())
    }

    async fn newt(&self, newt_id: &str) -> Result<Option<Newt>, MeshError> {
        let state = self.state.read().await;
        Ok(state.newts.iter().find(|n| n.newt_id == newt_id).cloned())
    }

    async fn newt_for_site(&self, site_id: SiteId) -> Result<Option<Newt>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .newts
            .iter()
            .find(|n| n.site_id == Some(site_id))
            .cloned())
    }

    async fn client(&self, client_id: ClientId) -> Result<Option<Client>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .clients
            .iter()
            .find(|c| c.client_id == client_id)
            .cloned())
    }

    async fn site(&self, site_id: SiteId) -> Result<Option<Site>, MeshError> {
        let state = self.state.read().await;
        Ok(state.sites.iter().find(|s| s.site_id == site_id).cloned())
    }

    async fn exit_node(&self, exit_node_id: ExitNodeId) -> Result<Option<ExitNode>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .exit_nodes
            .iter()
            .find(|e| e.exit_node_id == exit_node_id)
            .cloned())
    }

    async fn exit_node_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<ExitNode>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .exit_nodes
            .iter()
            .find(|e| e.public_key == public_key)
            .cloned())
    }

    async fn exit_node_by_name(&self, name: &str) -> Result<Option<ExitNode>, MeshError> {
        let state = self.state.read().await;
        Ok(state.exit_nodes.iter().find(|e| e.name == name).cloned())
    }

    async fn first_exit_node(&self) -> Result<Option<ExitNode>, MeshError> {
        let state = self.state.read().await;
        Ok(state.exit_nodes.first().cloned())
    }

    async fn client_sites(&self, client_id: ClientId) -> Result<Vec<Site>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .client_sites
            .iter()
            .filter(|link| link.client_id == client_id)
            .filter_map(|link| state.sites.iter().find(|s| s.site_id == link.site_id))
            .cloned()
            .collect())
    }

    async fn site_clients(&self, site_id: SiteId) -> Result<Vec<Client>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .client_sites
            .iter()
            .filter(|link| link.site_id == site_id)
            .filter_map(|link| state.clients.iter().find(|c| c.client_id == link.client_id))
            .cloned()
            .collect())
    }

    async fn site_resources_for_client(
        &self,
        site_id: SiteId,
        client_id: ClientId,
    ) -> Result<Vec<SiteResource>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .site_resources
            .iter()
            .filter(|sr| sr.site_id == site_id && sr.clients.contains(&client_id))
            .cloned()
            .collect())
    }

    async fn site_forwarding_targets(
        &self,
        site_id: SiteId,
    ) -> Result<Vec<(Target, TransportProtocol)>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .targets
            .iter()
            .filter(|t| t.site_id == site_id && t.enabled)
            .filter_map(|t| {
                state
                    .resources
                    .iter()
                    .find(|r| r.resource_id == t.resource_id)
                    .map(|r| (t.clone(), r.protocol))
            })
            .collect())
    }

    async fn find_org_client(
        &self,
        org_id: &OrgId,
        olm_id: &str,
    ) -> Result<Option<Client>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .clients
            .iter()
            .find(|c| &c.org_id == org_id && c.olm_id.as_deref() == Some(olm_id))
            .cloned())
    }

    async fn create_client(
        &self,
        org_id: &OrgId,
        olm_id: &str,
        user_id: Option<UserId>,
    ) -> Result<Client, MeshError> {
        let mut state = self.state.write().await;

        let org = state
            .orgs
            .iter()
            .find(|o| &o.org_id == org_id)
            .ok_or_else(|| MeshError::not_found("org", org_id))?;
        let pool: IpNet = org
            .subnet
            .as_deref()
            .ok_or_else(|| MeshError::Validation(format!("org {} has no client subnet", org_id)))?
            .parse()
            .map_err(|e| MeshError::Validation(format!("org {} subnet: {}", org_id, e)))?;

        let subnet = next_available_address(
            &pool,
            state
                .clients
                .iter()
                .filter(|c| &c.org_id == org_id)
                .map(|c| c.subnet.as_str()),
        )
        .ok_or_else(|| MeshError::Store(format!("org {} has no free client addresses", org_id)))?;

        let client_id = ClientId::new(
            state
                .clients
                .iter()
                .map(|c| c.client_id.get())
                .max()
                .unwrap_or(0)
                + 1,
        );

        let client = Client {
            client_id,
            org_id: org_id.clone(),
            name: format!("{}-{}", olm_id, org_id),
            user_id,
            olm_id: Some(olm_id.to_string()),
            public_key: None,
            subnet,
            last_hole_punch: None,
        };
        state.clients.push(client.clone());

        info!(client_id = %client_id, org_id = %org_id, "Created client {}", client.subnet);
        Ok(client)
    }

    async fn assign_olm_client(&self, olm_id: &str, client_id: ClientId) -> Result<(), MeshError> {
        let mut state = self.state.write().await;
        let olm = state
            .olms
            .iter_mut()
            .find(|o| o.olm_id == olm_id)
            .ok_or_else(|| MeshError::not_found("olm", olm_id))?;
        olm.client_id = Some(client_id);
        Ok(())
    }

    async fn update_olm_agent(
        &self,
        olm_id: &str,
        version: Option<String>,
        agent: Option<String>,
    ) -> Result<(), MeshError> {
        let mut state = self.state.write().await;
        let olm = state
            .olms
            .iter_mut()
            .find(|o| o.olm_id == olm_id)
            .ok_or_else(|| MeshError::not_found("olm", olm_id))?;
        if version.is_some() {
            olm.version = version;
        }
        if agent.is_some() {
            olm.agent = agent;
        }
        Ok(())
    }

    async fn set_client_public_key(
        &self,
        client_id: ClientId,
        public_key: &str,
    ) -> Result<Client, MeshError> {
        let mut state = self.state.write().await;
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.client_id == client_id)
            .ok_or_else(|| MeshError::not_found("client", client_id))?;
        client.public_key = Some(public_key.to_string());
        Ok(client.clone())
    }

    async fn record_client_hole_punch(
        &self,
        client_id: ClientId,
        timestamp: i64,
    ) -> Result<Client, MeshError> {
        let mut state = self.state.write().await;
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.client_id == client_id)
            .ok_or_else(|| MeshError::not_found("client", client_id))?;
        client.last_hole_punch = Some(timestamp);
        Ok(client.clone())
    }

    async fn update_site(
        &self,
        site_id: SiteId,
        patch: SitePatch,
    ) -> Result<Updated<Site>, MeshError> {
        let mut state = self.state.write().await;
        let site = state
            .sites
            .iter_mut()
            .find(|s| s.site_id == site_id)
            .ok_or_else(|| MeshError::not_found("site", site_id))?;

        let before = site.clone();
        if let Some(endpoint) = patch.endpoint {
            site.endpoint = Some(endpoint);
        }
        if let Some(public_key) = patch.public_key {
            site.public_key = Some(public_key);
        }
        if let Some(listen_port) = patch.listen_port {
            site.listen_port = Some(listen_port);
        }
        if let Some(ts) = patch.last_hole_punch {
            site.last_hole_punch = Some(ts);
        }

        Ok(Updated {
            before,
            after: site.clone(),
        })
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn resource_rows(&self) -> Result<Vec<ResourceTargetRow>, MeshError> {
        let state = self.state.read().await;

        let mut targets: Vec<&Target> = state.targets.iter().collect();
        targets.sort_by(|a, b| {
            let pa = a.priority.unwrap_or(100);
            let pb = b.priority.unwrap_or(100);
            pb.cmp(&pa).then(a.target_id.cmp(&b.target_id))
        });

        let mut rows = Vec::with_capacity(targets.len());
        for target in targets {
            let Some(resource) = state
                .resources
                .iter()
                .find(|r| r.resource_id == target.resource_id)
            else {
                debug!(target_id = %target.target_id, "Target references unknown resource");
                continue;
            };
            let Some(site) = state.sites.iter().find(|s| s.site_id == target.site_id) else {
                debug!(target_id = %target.target_id, "Target references unknown site");
                continue;
            };
            let domain = resource
                .domain_id
                .as_ref()
                .and_then(|id| state.domains.iter().find(|d| &d.domain_id == id))
                .cloned();

            rows.push(ResourceTargetRow {
                resource: resource.clone(),
                target: target.clone(),
                site: site.clone(),
                domain,
            });
        }
        Ok(rows)
    }

    async fn login_pages(&self, exit_node_id: ExitNodeId) -> Result<Vec<LoginPage>, MeshError> {
        let state = self.state.read().await;
        Ok(state
            .login_pages
            .iter()
            .filter(|lp| lp.exit_node_id == exit_node_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionValidator for MemoryStore {
    async fn validate_olm(&self, token: &str, olm_id: &str) -> Result<Olm, MeshError> {
        let digest = token_digest(token);
        let state = self.state.read().await;
        let olm = state
            .olms
            .iter()
            .find(|o| o.token_digest == digest)
            .ok_or_else(|| MeshError::Unauthorized("unknown olm session".into()))?;
        if olm.olm_id != olm_id {
            return Err(MeshError::Unauthorized(format!(
                "olm id mismatch: {} != {}",
                olm_id, olm.olm_id
            )));
        }
        Ok(olm.clone())
    }

    async fn validate_newt(&self, token: &str, newt_id: &str) -> Result<Newt, MeshError> {
        let digest = token_digest(token);
        let state = self.state.read().await;
        let newt = state
            .newts
            .iter()
            .find(|n| n.token_digest == digest)
            .ok_or_else(|| MeshError::Unauthorized("unknown newt session".into()))?;
        if newt.newt_id != newt_id {
            return Err(MeshError::Unauthorized(format!(
                "newt id mismatch: {} != {}",
                newt_id, newt.newt_id
            )));
        }
        Ok(newt.clone())
    }

    async fn validate_user(&self, token: &str, user_id: &UserId) -> Result<(), MeshError> {
        let digest = token_digest(token);
        let state = self.state.read().await;
        let owner = state
            .users
            .iter()
            .find(|u| u.session_digests.contains(&digest))
            .ok_or_else(|| MeshError::Unauthorized("unknown user session".into()))?;
        if &owner.user_id != user_id {
            return Err(MeshError::Unauthorized("user id mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceId, SiteKind, TargetId};

    fn snapshot() -> Snapshot {
        serde_json::from_value(serde_json::json!({
            "orgs": [{ "orgId": "acme", "name": "Acme", "subnet": "100.90.128.0/24" }],
            "sites": [{ "siteId": 1, "orgId": "acme", "name": "home", "type": "newt",
                        "subnet": "100.89.128.4/30" }],
            "clients": [{ "clientId": 1, "orgId": "acme", "name": "laptop",
                          "olmId": "olm-1", "subnet": "100.90.128.2/24" }],
            "olms": [{ "olmId": "olm-1", "clientId": 1, "tokenDigest": token_digest("secret") }],
            "clientSites": [{ "clientId": 1, "siteId": 1 }],
            "resources": [{ "resourceId": 1, "orgId": "acme", "name": "app" }],
            "targets": [
                { "targetId": 1, "resourceId": 1, "siteId": 1, "priority": 10 },
                { "targetId": 2, "resourceId": 1, "siteId": 1, "priority": 200 },
                { "targetId": 3, "resourceId": 1, "siteId": 1 }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_validate_olm_token() {
        let store = MemoryStore::new(snapshot());
        assert!(store.validate_olm("secret", "olm-1").await.is_ok());
        assert!(matches!(
            store.validate_olm("wrong", "olm-1").await,
            Err(MeshError::Unauthorized(_))
        ));
        assert!(matches!(
            store.validate_olm("secret", "olm-2").await,
            Err(MeshError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_resource_rows_ordered_by_priority_then_id() {
        let store = MemoryStore::new(snapshot());
        let rows = store.resource_rows().await.unwrap();
        let ids: Vec<TargetId> = rows.iter().map(|r| r.target.target_id).collect();
        assert_eq!(ids, vec![TargetId::new(2), TargetId::new(3), TargetId::new(1)]);
        assert_eq!(rows[0].resource.resource_id, ResourceId::new(1));
        assert_eq!(rows[0].site.kind, SiteKind::Newt);
    }

    #[tokio::test]
    async fn test_create_client_allocates_next_address() {
        let store = MemoryStore::new(snapshot());
        let client = store
            .create_client(&OrgId::new("acme"), "olm-1", None)
            .await
            .unwrap();
        assert_eq!(client.client_id, ClientId::new(2));
        assert_eq!(client.subnet, "100.90.128.3/24");
    }

    #[tokio::test]
    async fn test_update_site_returns_before_and_after() {
        let store = MemoryStore::new(snapshot());
        let updated = store
            .update_site(
                SiteId::new(1),
                SitePatch {
                    endpoint: Some("198.51.100.7:51820".into()),
                    last_hole_punch: Some(1_700_000_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.before.endpoint, None);
        assert_eq!(updated.after.endpoint.as_deref(), Some("198.51.100.7:51820"));
        assert_eq!(updated.after.last_hole_punch, Some(1_700_000_000));

        let missing = store.update_site(SiteId::new(9), SitePatch::default()).await;
        assert!(matches!(missing, Err(MeshError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_load_snapshot_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mesh.json");
        std::fs::write(&path, serde_json::to_vec(&snapshot()).unwrap()).unwrap();

        let store = MemoryStore::load(&path).await.unwrap();
        let sites = store.client_sites(ClientId::new(1)).await.unwrap();
        assert_eq!(sites.len(), 1);
    }
}
