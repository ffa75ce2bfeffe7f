//! Relay and unrelay of client/site pairs
//!
//! A relayed pair exchanges traffic through the site's exit node instead of
//! a direct punched path. Relaying clears the client's endpoint on the site
//! (so the exit node forwards); unrelaying restores the cached endpoint.

use std::sync::Arc;

use wr_core::model::{Client, ExitNode, Site};
use wr_core::traits::MeshStore;
use wr_core::{ClientId, MeshError, SiteId};
use wr_protocol::{OutboundMessage, RelayParams, SitePeerUpdate, UnrelayParams};

use crate::association::AssociationCache;
use crate::messenger::PeerMessenger;

pub struct RelayOrchestrator {
    store: Arc<dyn MeshStore>,
    associations: Arc<AssociationCache>,
    messenger: PeerMessenger,
    relay_port: u16,
}

impl RelayOrchestrator {
    pub fn new(
        store: Arc<dyn MeshStore>,
        associations: Arc<AssociationCache>,
        messenger: PeerMessenger,
        relay_port: u16,
    ) -> Self {
        Self {
            store,
            associations,
            messenger,
            relay_port,
        }
    }

    /// Switch a pair into or out of relay mode, returning the reply for the
    /// client
    pub async fn set_relay(
        &self,
        client_id: ClientId,
        site_id: SiteId,
        relayed: bool,
    ) -> Result<Option<OutboundMessage>, MeshError> {
        if relayed {
            Ok(self
                .relay(client_id, site_id)
                .await?
                .map(OutboundMessage::ClientPeerRelay))
        } else {
            Ok(self
                .unrelay(client_id, site_id)
                .await?
                .map(OutboundMessage::ClientPeerUnrelay))
        }
    }

    pub async fn relay(
        &self,
        client_id: ClientId,
        site_id: SiteId,
    ) -> Result<Option<RelayParams>, MeshError> {
        let client = self.client(client_id).await?;
        let Some(client_key) = client.public_key.clone() else {
            tracing::warn!(%client_id, "Client has no public key, cannot relay");
            return Ok(None);
        };
        let site = self.site(site_id).await?;
        let exit_node = self.exit_node_of(&site).await?;

        if self
            .associations
            .set_relayed(client_id, site_id, true)
            .is_none()
        {
            tracing::debug!(%client_id, %site_id, "No association yet, relaying anyway");
        }

        // An empty endpoint tells the site to reach the client via the exit node
        self.messenger
            .update_site_peer(
                site_id,
                SitePeerUpdate {
                    public_key: client_key,
                    allowed_ips: None,
                    endpoint: Some(String::new()),
                },
            )
            .await;

        tracing::info!(%client_id, %site_id, exit_node = %exit_node.name, "Relaying");
        Ok(Some(RelayParams {
            site_id: site_id.get(),
            relay_endpoint: exit_node.endpoint,
            relay_port: self.relay_port,
        }))
    }

    pub async fn unrelay(
        &self,
        client_id: ClientId,
        site_id: SiteId,
    ) -> Result<Option<UnrelayParams>, MeshError> {
        let client = self.client(client_id).await?;
        let Some(client_key) = client.public_key.clone() else {
            tracing::warn!(%client_id, "Client has no public key, cannot unrelay");
            return Ok(None);
        };
        let site = self.site(site_id).await?;

        let Some(association) = self.associations.set_relayed(client_id, site_id, false) else {
            tracing::warn!(%client_id, %site_id, "No association, cannot unrelay");
            return Ok(None);
        };
        let Some(endpoint) = association.endpoint else {
            tracing::warn!(%client_id, %site_id, "Association has no endpoint, cannot unrelay");
            return Ok(None);
        };

        self.messenger
            .update_site_peer(
                site_id,
                SitePeerUpdate {
                    public_key: client_key,
                    allowed_ips: None,
                    endpoint: Some(endpoint),
                },
            )
            .await;

        tracing::info!(%client_id, %site_id, "Unrelayed");
        Ok(Some(UnrelayParams {
            site_id: site_id.get(),
            endpoint: site.endpoint,
        }))
    }

    async fn client(&self, client_id: ClientId) -> Result<Client, MeshError> {
        self.store
            .client(client_id)
            .await?
            .ok_or_else(|| MeshError::not_found("client", client_id))
    }

    async fn site(&self, site_id: SiteId) -> Result<Site, MeshError> {
        self.store
            .site(site_id)
            .await?
            .ok_or_else(|| MeshError::not_found("site", site_id))
    }

    async fn exit_node_of(&self, site: &Site) -> Result<ExitNode, MeshError> {
        let exit_node_id = site
            .exit_node_id
            .ok_or_else(|| MeshError::not_found("exit node for site", site.site_id))?;
        self.store
            .exit_node(exit_node_id)
            .await?
            .ok_or_else(|| MeshError::not_found("exit node", exit_node_id))
    }
}
