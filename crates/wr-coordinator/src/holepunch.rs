//! Hole-punch report handling
//!
//! Exit nodes forward every NAT punch they observe. A client punch refreshes
//! the client's association with each site behind the reporting exit node;
//! a site punch refreshes the site's public endpoint and reaches every client
//! linked to the site. Either way, peers on the other side are told only when
//! something actually moved.

use std::sync::Arc;

use futures::future::join_all;

use wr_core::model::{Client, ExitNode, Site, SitePatch};
use wr_core::traits::{MeshStore, SessionValidator};
use wr_core::{MeshError, OrgId};
use wr_protocol::{ClientPeerUpdate, HolePunchReport, PeerDestination, PeerKind, SitePeerUpdate};

use crate::association::AssociationCache;
use crate::messenger::PeerMessenger;

pub struct HolePunchCoordinator {
    store: Arc<dyn MeshStore>,
    sessions: Arc<dyn SessionValidator>,
    associations: Arc<AssociationCache>,
    messenger: PeerMessenger,
}

impl HolePunchCoordinator {
    pub fn new(
        store: Arc<dyn MeshStore>,
        sessions: Arc<dyn SessionValidator>,
        associations: Arc<AssociationCache>,
        messenger: PeerMessenger,
    ) -> Self {
        Self {
            store,
            sessions,
            associations,
            messenger,
        }
    }

    /// Process one report.
    ///
    /// For a client punch, returns the tunnel addresses of the sites the
    /// exit node should forward that client's traffic to. A site punch
    /// returns an empty list.
    pub async fn report(
        &self,
        report: &HolePunchReport,
    ) -> Result<Vec<PeerDestination>, MeshError> {
        let (kind, peer) = report.peer().ok_or_else(|| {
            MeshError::Validation("hole punch must name exactly one of olmId or newtId".into())
        })?;

        let endpoint = report.observed_endpoint();
        tracing::debug!(%kind, %peer, %endpoint, "Hole punch report");

        match kind {
            PeerKind::Client => {
                let olm = self
                    .sessions
                    .validate_olm(&report.token, peer.as_str())
                    .await?;
                let exit_node = self.resolve_exit_node(report).await?;
                let client_id = olm
                    .client_id
                    .ok_or_else(|| MeshError::not_found("client for olm", &olm.olm_id))?;
                let client = self
                    .store
                    .client(client_id)
                    .await?
                    .ok_or_else(|| MeshError::not_found("client", client_id))?;
                check_org(&exit_node, &client.org_id)?;

                let client = self
                    .store
                    .record_client_hole_punch(client_id, report.timestamp)
                    .await?;
                self.client_punched(client, &exit_node, &endpoint, report.public_key.as_deref())
                    .await
            }
            PeerKind::Site => {
                let newt = self
                    .sessions
                    .validate_newt(&report.token, peer.as_str())
                    .await?;
                let exit_node = self.resolve_exit_node(report).await?;
                let site_id = newt
                    .site_id
                    .ok_or_else(|| MeshError::not_found("site for newt", &newt.newt_id))?;
                let site = self
                    .store
                    .site(site_id)
                    .await?
                    .ok_or_else(|| MeshError::not_found("site", site_id))?;
                check_org(&exit_node, &site.org_id)?;

                self.site_punched(site, report, endpoint).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Reporting exit node, by key; nodes that predate multi-node support
    /// fall back to the first configured node.
    async fn resolve_exit_node(&self, report: &HolePunchReport) -> Result<ExitNode, MeshError> {
        let node = match &report.exit_node_public_key {
            Some(key) => self.store.exit_node_by_public_key(key).await?,
            None => self.store.first_exit_node().await?,
        };

        node.ok_or_else(|| {
            MeshError::not_found(
                "exit node",
                report.exit_node_public_key.as_deref().unwrap_or("<any>"),
            )
        })
    }

    async fn client_punched(
        &self,
        client: Client,
        exit_node: &ExitNode,
        endpoint: &str,
        reported_key: Option<&str>,
    ) -> Result<Vec<PeerDestination>, MeshError> {
        let public_key = reported_key.or(client.public_key.as_deref());
        let sites: Vec<Site> = self
            .store
            .client_sites(client.client_id)
            .await?
            .into_iter()
            .filter(|s| s.exit_node_id == Some(exit_node.exit_node_id))
            .collect();

        let mut notifications = Vec::new();
        for site in &sites {
            let change = self.associations.record_hole_punch(
                client.client_id,
                site.site_id,
                endpoint,
                public_key,
            );
            if !change.is_changed() {
                continue;
            }

            let association = change.current();
            if association.is_relayed {
                tracing::debug!(
                    client_id = %client.client_id,
                    site_id = %site.site_id,
                    "Association is relayed, not pushing endpoint"
                );
                continue;
            }
            let Some(key) = association.public_key.clone() else {
                tracing::debug!(client_id = %client.client_id, "Client has no public key yet");
                continue;
            };

            tracing::info!(
                client_id = %client.client_id,
                site_id = %site.site_id,
                %endpoint,
                "Client endpoint changed"
            );
            let update = SitePeerUpdate {
                public_key: key,
                allowed_ips: None,
                endpoint: Some(endpoint.to_string()),
            };
            notifications.push(self.messenger.update_site_peer(site.site_id, update));
        }
        join_all(notifications).await;

        Ok(sites
            .iter()
            .filter_map(|site| match (site.subnet_address(), site.listen_port) {
                (Some(ip), Some(port)) => Some(PeerDestination {
                    destination_ip: ip.to_string(),
                    destination_port: port,
                }),
                _ => None,
            })
            .collect())
    }

    async fn site_punched(
        &self,
        site: Site,
        report: &HolePunchReport,
        endpoint: String,
    ) -> Result<(), MeshError> {
        let patch = SitePatch {
            endpoint: Some(endpoint.clone()),
            public_key: report.public_key.clone(),
            listen_port: report.listen_port,
            last_hole_punch: Some(report.timestamp),
        };
        let updated = self.store.update_site(site.site_id, patch).await?;

        if updated.before.endpoint == updated.after.endpoint {
            return Ok(());
        }
        let site = updated.after;
        tracing::info!(site_id = %site.site_id, %endpoint, "Site endpoint changed");

        let Some(site_key) = site.public_key.clone() else {
            tracing::warn!(site_id = %site.site_id, "Site has no public key, clients not updated");
            return Ok(());
        };

        // every linked client, punched through yet or not; relayed pairs
        // keep talking through the exit node
        let mut notifications = Vec::new();
        for client in self.store.site_clients(site.site_id).await? {
            let relayed = self
                .associations
                .get(client.client_id, site.site_id)
                .is_some_and(|a| a.is_relayed);
            if relayed {
                continue;
            }
            let update = ClientPeerUpdate {
                site_id: site.site_id.get(),
                public_key: site_key.clone(),
                endpoint: endpoint.clone(),
                relay_endpoint: None,
                server_ip: site.address.clone(),
                server_port: site.listen_port,
                remote_subnets: None,
            };
            notifications.push(async move {
                self.messenger.update_client_peer(&client, update).await
            });
        }
        join_all(notifications).await;
        Ok(())
    }
}

fn check_org(exit_node: &ExitNode, org_id: &OrgId) -> Result<(), MeshError> {
    if exit_node.allows_org(org_id) {
        Ok(())
    } else {
        Err(MeshError::not_found(
            "exit node",
            format!("{} is not allowed for org {}", exit_node.name, org_id),
        ))
    }
}
