//! Message types for the warren message bus
//!
//! Every message is an adjacently tagged JSON envelope:
//!
//! ```json
//! { "type": "olm/wg/relay", "data": { "siteId": 7 } }
//! ```
//!
//! # Message Flow
//!
//! 1. The exit node forwards each NAT hole punch as a `HolePunch` report.
//! 2. A client agent sends `olm/wg/register`; the coordinator answers with
//!    `olm/wg/connect` and pushes `newt/wg/peer/add` to every reachable site.
//! 3. A site agent sends `newt/wg/get-config`; the coordinator answers with
//!    `newt/wg/receive-config` and pushes `olm/wg/peer/update` to its clients.
//! 4. Exit nodes get `gerbil/holepunch/destinations` back for each client
//!    punch, naming the site tunnels that client's traffic may reach.
//! 5. Either side may later see `peer/update`, `peer/remove`, `peer/relay`
//!    or `peer/unrelay` pushes as endpoints move and relay decisions change.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::peer::{PeerId, PeerKind};

/// A message family that can travel inside a `{type, data}` envelope.
pub trait Envelope: Serialize + DeserializeOwned {
    /// Every `type` string this family understands
    const TYPES: &'static [&'static str];

    /// Wire `type` of this message
    fn message_type(&self) -> &'static str;
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode one JSON envelope.
///
/// Unknown types and payloads that do not match their type are reported
/// separately so the dispatcher can log why a message was dropped.
pub fn decode_envelope<T: Envelope>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;

    if !T::TYPES.contains(&raw.message_type.as_str()) {
        return Err(ProtocolError::UnknownMessageType(raw.message_type));
    }

    let message_type = raw.message_type.clone();
    let value = serde_json::json!({ "type": raw.message_type, "data": raw.data });
    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload {
        message_type,
        reason: e.to_string(),
    })
}

/// Encode one JSON envelope
pub fn encode_envelope<T: Envelope>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

// ---------------------------------------------------------------------------
// Inbound (agent / exit node -> coordinator)
// ---------------------------------------------------------------------------

/// First frame on a stream connection, binding it to an agent session.
///
/// Exit nodes connect anonymously (no ids); their hole-punch reports carry
/// the reporting agent's token instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHello {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub olm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AgentHello {
    pub fn peer(&self) -> Option<(PeerKind, PeerId)> {
        match (&self.olm_id, &self.newt_id) {
            (Some(olm), None) => Some((PeerKind::Client, PeerId::new(olm.clone()))),
            (None, Some(newt)) => Some((PeerKind::Site, PeerId::new(newt.clone()))),
            _ => None,
        }
    }
}

/// NAT hole-punch observation relayed by an exit node.
///
/// Exactly one of `olm_id` / `newt_id` names the reporting agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolePunchReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub olm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newt_id: Option<String>,
    /// Session token of the reporting agent
    pub token: String,
    /// Observed source address
    pub ip: String,
    /// Observed source port
    pub port: u16,
    /// Unix seconds at which the punch was observed
    pub timestamp: i64,
    /// WireGuard public key of the reporting agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// WireGuard listen port of a reporting site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    /// Public key of the exit node that observed the punch. Exit nodes
    /// from before multi-node support leave this out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_node_public_key: Option<String>,
}

impl HolePunchReport {
    /// Which agent sent this report, if exactly one is named
    pub fn peer(&self) -> Option<(PeerKind, PeerId)> {
        match (&self.olm_id, &self.newt_id) {
            (Some(olm), None) => Some((PeerKind::Client, PeerId::new(olm.clone()))),
            (None, Some(newt)) => Some((PeerKind::Site, PeerId::new(newt.clone()))),
            _ => None,
        }
    }

    /// `ip:port` as observed by the exit node
    pub fn observed_endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Where an exit node should forward a client's punched traffic.
///
/// Returned to the exit node in answer to a client hole-punch report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDestination {
    #[serde(rename = "destinationIP")]
    pub destination_ip: String,
    pub destination_port: u16,
}

/// Answer to a client hole-punch report, sent to the reporting exit node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDestinations {
    pub destinations: Vec<PeerDestination>,
}

/// Client registration handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegisterRequest {
    pub public_key: String,
    /// Whether the client wants every site relayed through the exit node
    #[serde(default)]
    pub relay: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub olm_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub olm_agent: Option<String>,
    /// Org the client wants to join (org switching)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
}

/// Relay or unrelay request for one site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub site_id: u32,
}

/// Request to add one site peer outside the full registration flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPeerAddRequest {
    pub site_id: u32,
}

/// Site agent asking for its tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfigRequest {
    pub public_key: String,
    pub port: u16,
}

/// Messages the coordinator accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InboundMessage {
    #[serde(rename = "agent/hello")]
    Hello(AgentHello),

    #[serde(rename = "gerbil/holepunch/report")]
    HolePunch(HolePunchReport),

    #[serde(rename = "olm/wg/register")]
    ClientRegister(ClientRegisterRequest),

    #[serde(rename = "olm/wg/relay")]
    Relay(RelayRequest),

    #[serde(rename = "olm/wg/unrelay")]
    Unrelay(RelayRequest),

    #[serde(rename = "olm/wg/server/peer/add")]
    ServerPeerAdd(ServerPeerAddRequest),

    #[serde(rename = "newt/wg/get-config")]
    SiteGetConfig(SiteConfigRequest),
}

impl Envelope for InboundMessage {
    const TYPES: &'static [&'static str] = &[
        "agent/hello",
        "gerbil/holepunch/report",
        "olm/wg/register",
        "olm/wg/relay",
        "olm/wg/unrelay",
        "olm/wg/server/peer/add",
        "newt/wg/get-config",
    ];

    fn message_type(&self) -> &'static str {
        match self {
            InboundMessage::Hello(_) => "agent/hello",
            InboundMessage::HolePunch(_) => "gerbil/holepunch/report",
            InboundMessage::ClientRegister(_) => "olm/wg/register",
            InboundMessage::Relay(_) => "olm/wg/relay",
            InboundMessage::Unrelay(_) => "olm/wg/unrelay",
            InboundMessage::ServerPeerAdd(_) => "olm/wg/server/peer/add",
            InboundMessage::SiteGetConfig(_) => "newt/wg/get-config",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound (coordinator -> agent)
// ---------------------------------------------------------------------------

/// A client as seen by a site's WireGuard interface.
///
/// An empty `endpoint` means "reachable only through the relay".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePeer {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: String,
}

/// Partial update of a site-side peer, keyed by public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePeerUpdate {
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePeerRemove {
    pub public_key: String,
}

/// Raw TCP/UDP forwarding targets of a site, each `internalPort:ip:port`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTargets {
    pub udp: Vec<String>,
    pub tcp: Vec<String>,
}

/// Full configuration answer for a site agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteReceiveConfig {
    pub ip_address: Option<String>,
    pub peers: Vec<SitePeer>,
    pub targets: SiteTargets,
}

/// DNS alias a client should resolve inside the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteAlias {
    pub alias: String,
    pub alias_address: String,
}

/// A site as seen by a client's WireGuard interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSitePeer {
    pub site_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub endpoint: String,
    pub public_key: String,
    pub server_ip: Option<String>,
    pub server_port: Option<u16>,
    pub remote_subnets: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<SiteAlias>,
}

/// Update of a site peer on a client, keyed by `site_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPeerUpdate {
    pub site_id: u32,
    pub public_key: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_subnets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPeerRemove {
    pub site_id: u32,
    pub public_key: String,
}

/// Where a relayed client should send traffic for a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayParams {
    pub site_id: u32,
    pub relay_endpoint: String,
    pub relay_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrelayParams {
    pub site_id: u32,
    pub endpoint: Option<String>,
}

/// An exit node a client should punch toward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolePunchTarget {
    pub public_key: String,
    pub endpoint: String,
    pub relay_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolePunchAll {
    pub exit_nodes: Vec<HolePunchTarget>,
}

/// Result of a full client registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnect {
    pub sites: Vec<ClientSitePeer>,
    #[serde(rename = "tunnelIP")]
    pub tunnel_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utility_subnet: Option<String>,
}

/// Messages the coordinator pushes to agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "newt/wg/peer/add")]
    SitePeerAdd(SitePeer),

    #[serde(rename = "newt/wg/peer/update")]
    SitePeerUpdate(SitePeerUpdate),

    #[serde(rename = "newt/wg/peer/remove")]
    SitePeerRemove(SitePeerRemove),

    #[serde(rename = "newt/wg/receive-config")]
    SiteReceiveConfig(SiteReceiveConfig),

    #[serde(rename = "olm/wg/peer/add")]
    ClientPeerAdd(ClientSitePeer),

    #[serde(rename = "olm/wg/peer/update")]
    ClientPeerUpdate(ClientPeerUpdate),

    #[serde(rename = "olm/wg/peer/remove")]
    ClientPeerRemove(ClientPeerRemove),

    #[serde(rename = "olm/wg/peer/relay")]
    ClientPeerRelay(RelayParams),

    #[serde(rename = "olm/wg/peer/unrelay")]
    ClientPeerUnrelay(UnrelayParams),

    #[serde(rename = "olm/wg/holepunch/all")]
    HolePunchAll(HolePunchAll),

    #[serde(rename = "olm/wg/connect")]
    ClientConnect(ClientConnect),

    #[serde(rename = "gerbil/holepunch/destinations")]
    HolePunchDestinations(PeerDestinations),
}

impl Envelope for OutboundMessage {
    const TYPES: &'static [&'static str] = &[
        "newt/wg/peer/add",
        "newt/wg/peer/update",
        "newt/wg/peer/remove",
        "newt/wg/receive-config",
        "olm/wg/peer/add",
        "olm/wg/peer/update",
        "olm/wg/peer/remove",
        "olm/wg/peer/relay",
        "olm/wg/peer/unrelay",
        "olm/wg/holepunch/all",
        "olm/wg/connect",
        "gerbil/holepunch/destinations",
    ];

    fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::SitePeerAdd(_) => "newt/wg/peer/add",
            OutboundMessage::SitePeerUpdate(_) => "newt/wg/peer/update",
            OutboundMessage::SitePeerRemove(_) => "newt/wg/peer/remove",
            OutboundMessage::SiteReceiveConfig(_) => "newt/wg/receive-config",
            OutboundMessage::ClientPeerAdd(_) => "olm/wg/peer/add",
            OutboundMessage::ClientPeerUpdate(_) => "olm/wg/peer/update",
            OutboundMessage::ClientPeerRemove(_) => "olm/wg/peer/remove",
            OutboundMessage::ClientPeerRelay(_) => "olm/wg/peer/relay",
            OutboundMessage::ClientPeerUnrelay(_) => "olm/wg/peer/unrelay",
            OutboundMessage::HolePunchAll(_) => "olm/wg/holepunch/all",
            OutboundMessage::ClientConnect(_) => "olm/wg/connect",
            OutboundMessage::HolePunchDestinations(_) => "gerbil/holepunch/destinations",
        }
    }
}
