//! Read model and narrow update surface of the relational store

use async_trait::async_trait;

use crate::error::MeshError;
use crate::model::{
    Client, ExitNode, LoginPage, Newt, Olm, Org, ResourceTargetRow, Site, SitePatch,
    SiteResource, Target,
};
use crate::types::{ClientId, ExitNodeId, OrgId, SiteId, TransportProtocol, UserId};

/// Row state before and after a conditional update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Updated<T> {
    pub before: T,
    pub after: T,
}

/// Store operations used by the orchestration handlers.
///
/// Lookups return `Ok(None)` for missing rows; updates of a missing row fail
/// with [`MeshError::NotFound`].
#[async_trait]
pub trait MeshStore: Send + Sync {
    async fn org(&self, org_id: &OrgId) -> Result<Option<Org>, MeshError>;

    async fn olm(&self, olm_id: &str) -> Result<Option<Olm>, MeshError>;

    async fn newt(&self, newt_id: &str) -> Result<Option<Newt>, MeshError>;

    /// Newt currently bound to a site
    async fn newt_for_site(&self, site_id: SiteId) -> Result<Option<Newt>, MeshError>;

    async fn client(&self, client_id: ClientId) -> Result<Option<Client>, MeshError>;

    async fn site(&self, site_id: SiteId) -> Result<Option<Site>, MeshError>;

    async fn exit_node(&self, exit_node_id: ExitNodeId) -> Result<Option<ExitNode>, MeshError>;

    async fn exit_node_by_public_key(&self, public_key: &str)
        -> Result<Option<ExitNode>, MeshError>;

    async fn exit_node_by_name(&self, name: &str) -> Result<Option<ExitNode>, MeshError>;

    /// Fallback for exit nodes that do not identify themselves
    async fn first_exit_node(&self) -> Result<Option<ExitNode>, MeshError>;

    /// Sites a client is linked to
    async fn client_sites(&self, client_id: ClientId) -> Result<Vec<Site>, MeshError>;

    /// Clients linked to a site
    async fn site_clients(&self, site_id: SiteId) -> Result<Vec<Client>, MeshError>;

    /// Site resources on `site_id` the client has been granted
    async fn site_resources_for_client(
        &self,
        site_id: SiteId,
        client_id: ClientId,
    ) -> Result<Vec<SiteResource>, MeshError>;

    /// Enabled targets on a site with their resource's protocol
    async fn site_forwarding_targets(
        &self,
        site_id: SiteId,
    ) -> Result<Vec<(Target, TransportProtocol)>, MeshError>;

    /// Client of `org_id` owned by this olm, if any
    async fn find_org_client(
        &self,
        org_id: &OrgId,
        olm_id: &str,
    ) -> Result<Option<Client>, MeshError>;

    /// Create a client in `org_id` with the next free tunnel address
    async fn create_client(
        &self,
        org_id: &OrgId,
        olm_id: &str,
        user_id: Option<UserId>,
    ) -> Result<Client, MeshError>;

    /// Point an olm at a (possibly different) client
    async fn assign_olm_client(&self, olm_id: &str, client_id: ClientId) -> Result<(), MeshError>;

    async fn update_olm_agent(
        &self,
        olm_id: &str,
        version: Option<String>,
        agent: Option<String>,
    ) -> Result<(), MeshError>;

    async fn set_client_public_key(
        &self,
        client_id: ClientId,
        public_key: &str,
    ) -> Result<Client, MeshError>;

    async fn record_client_hole_punch(
        &self,
        client_id: ClientId,
        timestamp: i64,
    ) -> Result<Client, MeshError>;

    /// Apply the set fields of `patch` atomically
    async fn update_site(
        &self,
        site_id: SiteId,
        patch: SitePatch,
    ) -> Result<Updated<Site>, MeshError>;
}

/// Read-only queries of the proxy-config compiler
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Every resource x target x site join row, targets ordered by
    /// descending priority then id
    async fn resource_rows(&self) -> Result<Vec<ResourceTargetRow>, MeshError>;

    async fn login_pages(&self, exit_node_id: ExitNodeId) -> Result<Vec<LoginPage>, MeshError>;
}
