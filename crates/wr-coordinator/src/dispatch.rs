//! Routes inbound envelopes to the orchestration handlers
//!
//! The dispatcher is transport-agnostic: a connection task (or a test)
//! hands it each message with the identity the connection authenticated
//! as, and writes back whatever reply it returns.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use wr_core::model::{Newt, Olm};
use wr_core::traits::{MeshStore, SessionValidator};
use wr_core::{ClientId, MeshError, SiteId};
use wr_protocol::{
    AgentHello, Envelope, InboundMessage, OutboundMessage, PeerDestinations, PeerId, PeerKind,
};

use crate::holepunch::HolePunchCoordinator;
use crate::registration::{Registration, RegistrationOrchestrator};
use crate::relay::RelayOrchestrator;

pub struct Dispatcher {
    store: Arc<dyn MeshStore>,
    sessions: Arc<dyn SessionValidator>,
    holepunch: HolePunchCoordinator,
    relay: RelayOrchestrator,
    registration: RegistrationOrchestrator,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MeshStore>,
        sessions: Arc<dyn SessionValidator>,
        holepunch: HolePunchCoordinator,
        relay: RelayOrchestrator,
        registration: RegistrationOrchestrator,
    ) -> Self {
        Self {
            store,
            sessions,
            holepunch,
            relay,
            registration,
        }
    }

    /// Check a connection handshake.
    ///
    /// Returns the agent identity, or `None` for an anonymous (exit node)
    /// connection.
    pub async fn authenticate(
        &self,
        hello: &AgentHello,
    ) -> Result<Option<(PeerKind, PeerId)>, MeshError> {
        let Some((kind, peer)) = hello.peer() else {
            if hello.olm_id.is_some() && hello.newt_id.is_some() {
                return Err(MeshError::Validation(
                    "hello must name at most one of olmId or newtId".into(),
                ));
            }
            return Ok(None);
        };
        let token = hello
            .token
            .as_deref()
            .ok_or_else(|| MeshError::Unauthorized(format!("{} {} sent no token", kind, peer)))?;

        match kind {
            PeerKind::Client => {
                self.sessions.validate_olm(token, peer.as_str()).await?;
            }
            PeerKind::Site => {
                self.sessions.validate_newt(token, peer.as_str()).await?;
            }
        }
        Ok(Some((kind, peer)))
    }

    /// Handle one message from `sender` (an authenticated agent, or `None`
    /// for an anonymous connection)
    pub async fn handle(
        &self,
        sender: Option<&PeerId>,
        message: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboundMessage>, MeshError> {
        tracing::debug!(
            sender = sender.map(PeerId::as_str).unwrap_or("<anonymous>"),
            message_type = message.message_type(),
            "Dispatching"
        );

        match message {
            InboundMessage::Hello(_) => Err(MeshError::Validation(
                "hello is only valid as the first frame".into(),
            )),

            InboundMessage::HolePunch(report) => {
                let is_client = report.olm_id.is_some();
                let destinations = self.holepunch.report(&report).await?;
                Ok(is_client.then(|| {
                    OutboundMessage::HolePunchDestinations(PeerDestinations { destinations })
                }))
            }

            InboundMessage::ClientRegister(request) => {
                let olm = self.olm(sender).await?;
                let reply = match self
                    .registration
                    .register_client(&olm, &request, now)
                    .await?
                {
                    Registration::Connected(connect) => OutboundMessage::ClientConnect(connect),
                    Registration::AwaitingHolePunch(targets) => {
                        OutboundMessage::HolePunchAll(targets)
                    }
                };
                Ok(Some(reply))
            }

            InboundMessage::Relay(request) => {
                let client_id = self.olm_client_id(sender).await?;
                self.relay
                    .set_relay(client_id, SiteId::new(request.site_id), true)
                    .await
            }

            InboundMessage::Unrelay(request) => {
                let client_id = self.olm_client_id(sender).await?;
                self.relay
                    .set_relay(client_id, SiteId::new(request.site_id), false)
                    .await
            }

            InboundMessage::ServerPeerAdd(request) => {
                let olm = self.olm(sender).await?;
                let peer = self
                    .registration
                    .register_peer_on_demand(&olm, SiteId::new(request.site_id))
                    .await?;
                Ok(Some(OutboundMessage::ClientPeerAdd(peer)))
            }

            InboundMessage::SiteGetConfig(request) => {
                let newt = self.newt(sender).await?;
                Ok(self
                    .registration
                    .site_config(&newt, &request, now)
                    .await?
                    .map(OutboundMessage::SiteReceiveConfig))
            }
        }
    }

    async fn olm(&self, sender: Option<&PeerId>) -> Result<Olm, MeshError> {
        let peer = sender
            .ok_or_else(|| MeshError::Unauthorized("message requires an olm session".into()))?;
        self.store
            .olm(peer.as_str())
            .await?
            .ok_or_else(|| MeshError::not_found("olm", peer))
    }

    async fn olm_client_id(&self, sender: Option<&PeerId>) -> Result<ClientId, MeshError> {
        let olm = self.olm(sender).await?;
        olm.client_id
            .ok_or_else(|| MeshError::not_found("client for olm", &olm.olm_id))
    }

    async fn newt(&self, sender: Option<&PeerId>) -> Result<Newt, MeshError> {
        let peer = sender
            .ok_or_else(|| MeshError::Unauthorized("message requires a newt session".into()))?;
        self.store
            .newt(peer.as_str())
            .await?
            .ok_or_else(|| MeshError::not_found("newt", peer))
    }
}
