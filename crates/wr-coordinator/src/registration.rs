//! Client registration, on-demand peer installs, and site config requests
//!
//! Registration is the point where a client's tunnel is (re)built: its key
//! is persisted, every reachable site learns the client as a WireGuard peer,
//! and the client receives one connect record per site.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use wr_core::config::RelayConfig;
use wr_core::model::{Client, ExitNode, Newt, Olm, Site, SitePatch};
use wr_core::net::{alias_config, remote_subnets};
use wr_core::traits::{MeshStore, SessionValidator};
use wr_core::types::TransportProtocol;
use wr_core::{MeshError, OrgId, SiteId};
use wr_protocol::{
    ClientConnect, ClientPeerUpdate, ClientRegisterRequest, ClientSitePeer, HolePunchAll,
    HolePunchTarget, SiteConfigRequest, SitePeer, SiteReceiveConfig, SiteTargets,
};

use crate::association::AssociationCache;
use crate::messenger::PeerMessenger;

/// Answer to a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Tunnel parameters for every reachable site
    Connected(ClientConnect),
    /// The client's last hole punch is stale; it should punch these exit
    /// nodes and register again
    AwaitingHolePunch(HolePunchAll),
}

pub struct RegistrationOrchestrator {
    store: Arc<dyn MeshStore>,
    sessions: Arc<dyn SessionValidator>,
    associations: Arc<AssociationCache>,
    messenger: PeerMessenger,
    relay: RelayConfig,
    do_not_create_new_client: bool,
}

impl RegistrationOrchestrator {
    pub fn new(
        store: Arc<dyn MeshStore>,
        sessions: Arc<dyn SessionValidator>,
        associations: Arc<AssociationCache>,
        messenger: PeerMessenger,
        relay: RelayConfig,
        do_not_create_new_client: bool,
    ) -> Self {
        Self {
            store,
            sessions,
            associations,
            messenger,
            relay,
            do_not_create_new_client,
        }
    }

    pub async fn register_client(
        &self,
        olm: &Olm,
        request: &ClientRegisterRequest,
        now: DateTime<Utc>,
    ) -> Result<Registration, MeshError> {
        if request.public_key.is_empty() {
            return Err(MeshError::Validation("public key not provided".into()));
        }

        let client = self.resolve_client(olm, request).await?;
        let org = self
            .store
            .org(&client.org_id)
            .await?
            .ok_or_else(|| MeshError::not_found("org", &client.org_id))?;

        let version_changed = request
            .olm_version
            .as_ref()
            .is_some_and(|v| olm.version.as_ref() != Some(v));
        let agent_changed = request
            .olm_agent
            .as_ref()
            .is_some_and(|a| olm.agent.as_ref() != Some(a));
        if version_changed || agent_changed {
            self.store
                .update_olm_agent(
                    &olm.olm_id,
                    request.olm_version.clone(),
                    request.olm_agent.clone(),
                )
                .await?;
        }

        // Key rotation: the old key is torn down per site below
        let previous_key = client
            .public_key
            .clone()
            .filter(|key| key != &request.public_key);
        let client = if client.public_key.as_deref() != Some(request.public_key.as_str()) {
            tracing::info!(client_id = %client.client_id, "Client public key changed");
            let updated = self
                .store
                .set_client_public_key(client.client_id, &request.public_key)
                .await?;
            self.associations
                .reset_relay_for_client(client.client_id, request.relay);
            updated
        } else {
            client
        };

        let sites = self.store.client_sites(client.client_id).await?;
        tracing::debug!(client_id = %client.client_id, sites = sites.len(), "Registering client");

        let since_punch = now.timestamp() - client.last_hole_punch.unwrap_or(0);
        if !sites.is_empty() && since_punch > self.relay.register_punch_window.as_secs() as i64 {
            tracing::warn!(
                client_id = %client.client_id,
                since_punch,
                "Last hole punch too old, asking client to punch first"
            );
            return Ok(Registration::AwaitingHolePunch(
                self.hole_punch_targets(&sites).await?,
            ));
        }

        let mut connect = Vec::with_capacity(sites.len());
        for site in &sites {
            if let Some(record) = self
                .connect_site(&client, site, previous_key.as_deref(), request.relay)
                .await?
            {
                connect.push(record);
            }
        }

        tracing::info!(
            client_id = %client.client_id,
            sites = connect.len(),
            "Client registered"
        );
        Ok(Registration::Connected(ClientConnect {
            sites: connect,
            tunnel_ip: client.subnet.clone(),
            utility_subnet: org.utility_subnet,
        }))
    }

    /// Install the client on one site outside a full registration.
    ///
    /// The client's endpoint is taken from any association recorded under
    /// its current key, so an endpoint from an older session is never
    /// reused.
    pub async fn register_peer_on_demand(
        &self,
        olm: &Olm,
        site_id: SiteId,
    ) -> Result<ClientSitePeer, MeshError> {
        let site = self.site(site_id).await?;
        let site_endpoint = site
            .endpoint
            .clone()
            .ok_or_else(|| MeshError::Validation(format!("site {} has no endpoint", site_id)))?;
        let client = self.olm_client(olm).await?;
        let client_key = client.public_key.clone().ok_or_else(|| {
            MeshError::Validation(format!("client {} has no public key", client.client_id))
        })?;

        let endpoint = self
            .associations
            .for_client(client.client_id)
            .into_iter()
            .filter(|a| a.public_key.as_deref() == Some(client_key.as_str()))
            .find_map(|a| a.endpoint)
            .ok_or_else(|| MeshError::not_found("endpoint for client", client.client_id))?;

        // Always direct first; relaying happens on request
        self.messenger
            .add_site_peer(
                site_id,
                SitePeer {
                    public_key: client_key,
                    allowed_ips: vec![client.allowed_ip()],
                    endpoint,
                },
            )
            .await;

        let resources = self
            .store
            .site_resources_for_client(site_id, client.client_id)
            .await?;
        Ok(ClientSitePeer {
            site_id: site_id.get(),
            name: Some(site.name.clone()),
            endpoint: site_endpoint,
            public_key: site.public_key.clone().unwrap_or_default(),
            server_ip: site.address.clone(),
            server_port: site.listen_port,
            remote_subnets: remote_subnets(&resources),
            aliases: alias_config(&resources),
        })
    }

    /// Answer a site agent's config request.
    ///
    /// Returns `None` while the site has not completed a fresh hole punch.
    pub async fn site_config(
        &self,
        newt: &Newt,
        request: &SiteConfigRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<SiteReceiveConfig>, MeshError> {
        let site_id = newt
            .site_id
            .ok_or_else(|| MeshError::not_found("site for newt", &newt.newt_id))?;
        let existing = self.site(site_id).await?;

        if existing.endpoint.is_none() {
            tracing::warn!(%site_id, "Site has no endpoint yet, skipping config");
            return Ok(None);
        }
        if let Some(last) = existing.last_hole_punch {
            if now.timestamp() - last > self.relay.config_punch_window.as_secs() as i64 {
                tracing::warn!(%site_id, "Site hole punch too old, skipping config");
                return Ok(None);
            }
        }

        let site = self
            .store
            .update_site(
                site_id,
                SitePatch {
                    public_key: Some(request.public_key.clone()),
                    listen_port: Some(request.port),
                    ..Default::default()
                },
            )
            .await?
            .after;
        let exit_node = match site.exit_node_id {
            Some(id) => self.store.exit_node(id).await?,
            None => None,
        };

        let site_key = site
            .public_key
            .clone()
            .unwrap_or_else(|| request.public_key.clone());

        let mut peers = Vec::new();
        let mut notifications = Vec::new();
        for client in self.store.site_clients(site_id).await? {
            let Some(client_key) = client.public_key.clone() else {
                continue;
            };
            if client.subnet.is_empty() {
                continue;
            }

            let association = self.associations.get_or_default(client.client_id, site_id);
            let endpoint = if association.is_relayed {
                match &exit_node {
                    Some(node) => node.relay_endpoint(self.relay.clients_start_port),
                    None => {
                        tracing::warn!(%site_id, "Relayed site has no exit node, skipping client");
                        continue;
                    }
                }
            } else {
                match &site.endpoint {
                    Some(endpoint) => endpoint.clone(),
                    None => continue,
                }
            };

            let resources = self
                .store
                .site_resources_for_client(site_id, client.client_id)
                .await?;
            let update = ClientPeerUpdate {
                site_id: site_id.get(),
                public_key: site_key.clone(),
                endpoint,
                relay_endpoint: None,
                server_ip: site.address.clone(),
                server_port: site.listen_port,
                remote_subnets: Some(remote_subnets(&resources)),
            };

            let peer_endpoint = if association.is_relayed {
                Some(String::new())
            } else {
                association.endpoint.clone()
            };
            match peer_endpoint {
                Some(endpoint) => peers.push(SitePeer {
                    public_key: client_key,
                    allowed_ips: vec![client.allowed_ip()],
                    endpoint,
                }),
                None => {
                    tracing::debug!(client_id = %client.client_id, "Client has not punched this site yet")
                }
            }

            notifications.push(async move {
                self.messenger.update_client_peer(&client, update).await
            });
        }
        join_all(notifications).await;

        let mut targets = SiteTargets::default();
        for (target, protocol) in self.store.site_forwarding_targets(site_id).await? {
            let (Some(internal_port), Some(ip), Some(port)) =
                (target.internal_port, target.ip.as_ref(), target.port)
            else {
                continue;
            };
            let entry = format!("{}:{}:{}", internal_port, ip, port);
            match protocol {
                TransportProtocol::Tcp => targets.tcp.push(entry),
                TransportProtocol::Udp => targets.udp.push(entry),
            }
        }

        tracing::info!(%site_id, peers = peers.len(), "Sending site config");
        Ok(Some(SiteReceiveConfig {
            ip_address: site.address.clone(),
            peers,
            targets,
        }))
    }

    /// Client for this olm in the requested org (or its current client)
    async fn resolve_client(
        &self,
        olm: &Olm,
        request: &ClientRegisterRequest,
    ) -> Result<Client, MeshError> {
        let Some(org_id) = request.org_id.as_deref() else {
            return self.olm_client(olm).await;
        };
        let org_id = OrgId::new(org_id);

        let user_id = olm
            .user_id
            .as_ref()
            .ok_or_else(|| MeshError::Unauthorized(format!("olm {} has no user", olm.olm_id)))?;
        let token = request
            .user_token
            .as_deref()
            .ok_or_else(|| MeshError::Unauthorized("user token required to switch org".into()))?;
        self.sessions.validate_user(token, user_id).await?;

        let client = match self.store.find_org_client(&org_id, &olm.olm_id).await? {
            Some(client) => client,
            None if self.do_not_create_new_client => {
                return Err(MeshError::not_found(
                    "client",
                    format!("olm {} in org {}", olm.olm_id, org_id),
                ));
            }
            None => {
                tracing::info!(olm_id = %olm.olm_id, %org_id, "Creating client for olm");
                self.store
                    .create_client(&org_id, &olm.olm_id, olm.user_id.clone())
                    .await?
            }
        };

        if olm.client_id != Some(client.client_id) {
            self.store
                .assign_olm_client(&olm.olm_id, client.client_id)
                .await?;
        }
        Ok(client)
    }

    /// Peer-add and connect record for one site, or `None` if the site is
    /// not reachable yet
    async fn connect_site(
        &self,
        client: &Client,
        site: &Site,
        previous_key: Option<&str>,
        relay_requested: bool,
    ) -> Result<Option<ClientSitePeer>, MeshError> {
        let site_id = site.site_id;
        let Some(exit_node_id) = site.exit_node_id else {
            tracing::warn!(%site_id, "Site has no exit node, skipping");
            return Ok(None);
        };
        let Some(site_endpoint) = site.endpoint.clone() else {
            tracing::warn!(%site_id, "Site has no endpoint, skipping");
            return Ok(None);
        };

        if let Some(old_key) = previous_key {
            tracing::info!(%site_id, "Removing peer for rotated key");
            self.messenger.remove_site_peer(site_id, old_key).await;
        }

        if site.subnet.is_none() {
            tracing::warn!(%site_id, "Site has no subnet, skipping");
            return Ok(None);
        }

        let Some(client_key) = client.public_key.clone() else {
            return Ok(None);
        };
        let association = self.associations.get_or_default(client.client_id, site_id);
        let relayed = relay_requested || association.is_relayed;

        match &association.endpoint {
            Some(endpoint) => {
                self.messenger
                    .add_site_peer(
                        site_id,
                        SitePeer {
                            public_key: client_key,
                            allowed_ips: vec![client.allowed_ip()],
                            endpoint: if relayed { String::new() } else { endpoint.clone() },
                        },
                    )
                    .await;
            }
            None => {
                tracing::warn!(
                    client_id = %client.client_id,
                    %site_id,
                    "Client has no endpoint for site, skipping peer add"
                );
            }
        }

        let endpoint = if relayed {
            match self.store.exit_node(exit_node_id).await? {
                Some(node) => node.relay_endpoint(self.relay.clients_start_port),
                None => {
                    tracing::warn!(%site_id, %exit_node_id, "Exit node not found, skipping");
                    return Ok(None);
                }
            }
        } else {
            site_endpoint
        };

        let resources = self
            .store
            .site_resources_for_client(site_id, client.client_id)
            .await?;
        Ok(Some(ClientSitePeer {
            site_id: site_id.get(),
            name: Some(site.name.clone()),
            endpoint,
            public_key: site.public_key.clone().unwrap_or_default(),
            server_ip: site.address.clone(),
            server_port: site.listen_port,
            remote_subnets: remote_subnets(&resources),
            aliases: alias_config(&resources),
        }))
    }

    /// Distinct exit nodes behind the client's sites
    async fn hole_punch_targets(&self, sites: &[Site]) -> Result<HolePunchAll, MeshError> {
        let mut nodes: BTreeMap<_, ExitNode> = BTreeMap::new();
        for exit_node_id in sites.iter().filter_map(|s| s.exit_node_id) {
            if nodes.contains_key(&exit_node_id) {
                continue;
            }
            if let Some(node) = self.store.exit_node(exit_node_id).await? {
                nodes.insert(exit_node_id, node);
            }
        }

        Ok(HolePunchAll {
            exit_nodes: nodes
                .into_values()
                .map(|node| HolePunchTarget {
                    public_key: node.public_key,
                    endpoint: node.endpoint,
                    relay_port: self.relay.clients_start_port,
                })
                .collect(),
        })
    }

    async fn olm_client(&self, olm: &Olm) -> Result<Client, MeshError> {
        let client_id = olm
            .client_id
            .ok_or_else(|| MeshError::not_found("client for olm", &olm.olm_id))?;
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
}
