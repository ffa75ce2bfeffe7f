//! Entities read (and narrowly updated) by the coordinator
//!
//! These mirror the rows of the external relational store. They are
//! `camelCase` on the wire so a JSON snapshot of the store can be loaded
//! directly into [`crate::MemoryStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ClientId, DomainId, ExitNodeId, HealthStatus, LoginPageId, MaintenanceModeType, OrgId,
    PathMatchType, ResourceId, RewritePathType, SiteId, SiteKind, SiteResourceId,
    SiteResourceMode, TargetId, TransportProtocol, UserId,
};

/// Address part of `ip/prefix` (or the whole string if there is no prefix)
pub fn address_of(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Org {
    pub org_id: OrgId,
    pub name: String,
    /// Pool client tunnel addresses are allocated from
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub utility_subnet: Option<String>,
}

/// A relay-capable edge node terminating WireGuard tunnels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitNode {
    pub exit_node_id: ExitNodeId,
    pub name: String,
    pub public_key: String,
    /// Public host clients relay through (no port)
    pub endpoint: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Base URL of the exit node's control API
    #[serde(default)]
    pub reachable_at: Option<String>,
    /// Orgs allowed to use this node; `None` means unrestricted
    #[serde(default)]
    pub allowed_orgs: Option<Vec<OrgId>>,
}

impl ExitNode {
    pub fn allows_org(&self, org_id: &OrgId) -> bool {
        match &self.allowed_orgs {
            Some(orgs) => orgs.contains(org_id),
            None => true,
        }
    }

    /// `endpoint:port` for clients relayed through this node
    pub fn relay_endpoint(&self, relay_port: u16) -> String {
        format!("{}:{}", self.endpoint, relay_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub site_id: SiteId,
    pub org_id: OrgId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SiteKind,
    /// Tunnel subnet of a newt site, e.g. `100.89.128.4/30`
    #[serde(default)]
    pub subnet: Option<String>,
    /// Address of the site inside its own tunnel
    #[serde(default)]
    pub address: Option<String>,
    /// Last hole-punched `ip:port`
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub exit_node_id: Option<ExitNodeId>,
    #[serde(default)]
    pub online: bool,
    /// Unix seconds
    #[serde(default)]
    pub last_hole_punch: Option<i64>,
}

impl Site {
    /// Address part of the tunnel subnet, as exit nodes open it
    pub fn subnet_address(&self) -> Option<&str> {
        self.subnet.as_deref().map(address_of)
    }

    /// First host of the tunnel subnet, where the proxy reaches targets
    pub fn tunnel_host(&self) -> Option<std::net::IpAddr> {
        self.subnet.as_deref().and_then(crate::net::first_host)
    }
}

/// Fields a hole punch or config request may change on a site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitePatch {
    pub endpoint: Option<String>,
    pub public_key: Option<String>,
    pub listen_port: Option<u16>,
    pub last_hole_punch: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub client_id: ClientId,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Olm session that owns this client
    #[serde(default)]
    pub olm_id: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    /// Tunnel address with prefix, e.g. `100.90.128.2/24`
    pub subnet: String,
    #[serde(default)]
    pub last_hole_punch: Option<i64>,
}

impl Client {
    /// Single-host allowed-ips entry for this client
    pub fn allowed_ip(&self) -> String {
        format!("{}/32", address_of(&self.subnet))
    }
}

/// Client agent session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Olm {
    pub olm_id: String,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// SHA-256 hex digest of the session token
    pub token_digest: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

/// Site agent session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Newt {
    pub newt_id: String,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    pub token_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    #[serde(default)]
    pub session_digests: Vec<String>,
}

/// Cached client-to-site connectivity fact.
///
/// `endpoint` and `public_key` are those of the client as last seen by the
/// site's exit node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    pub client_id: ClientId,
    pub site_id: SiteId,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub is_relayed: bool,
}

impl Association {
    pub fn new(client_id: ClientId, site_id: SiteId) -> Self {
        Self {
            client_id,
            site_id,
            endpoint: None,
            public_key: None,
            is_relayed: false,
        }
    }
}

/// Private network resource a site exposes to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteResource {
    pub site_resource_id: SiteResourceId,
    pub site_id: SiteId,
    pub name: String,
    pub mode: SiteResourceMode,
    pub destination: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub alias_address: Option<String>,
    /// Clients granted access
    #[serde(default)]
    pub clients: Vec<ClientId>,
}

/// A routable service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_id: ResourceId,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub full_domain: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub domain_id: Option<DomainId>,
    #[serde(default = "default_true")]
    pub http: bool,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_protocol")]
    pub protocol: TransportProtocol,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub enable_proxy: bool,
    #[serde(default)]
    pub sticky_session: bool,
    #[serde(default)]
    pub tls_server_name: Option<String>,
    #[serde(default)]
    pub set_host_header: Option<String>,
    /// JSON list of `{name, value}` request headers
    #[serde(default)]
    pub headers: Option<String>,
    #[serde(default)]
    pub proxy_protocol: bool,
    #[serde(default)]
    pub proxy_protocol_version: Option<u8>,
    #[serde(default)]
    pub maintenance_mode_enabled: bool,
    #[serde(default)]
    pub maintenance_mode_type: Option<MaintenanceModeType>,
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> TransportProtocol {
    TransportProtocol::Tcp
}

/// A backend endpoint of a resource on a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub target_id: TargetId,
    pub resource_id: ResourceId,
    pub site_id: SiteId,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub internal_port: Option<u16>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub health: Option<HealthStatus>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub path_match_type: Option<PathMatchType>,
    #[serde(default)]
    pub rewrite_path: Option<String>,
    #[serde(default)]
    pub rewrite_path_type: Option<RewritePathType>,
    /// Router priority; 100 (or unset) means "derive from path config"
    #[serde(default)]
    pub priority: Option<u32>,
}

impl Target {
    pub fn is_unhealthy(&self) -> bool {
        self.health == Some(HealthStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub domain_id: DomainId,
    pub base_domain: String,
    #[serde(default)]
    pub cert_resolver: Option<String>,
    #[serde(default)]
    pub prefer_wildcard_cert: Option<bool>,
    /// Set when the domain belongs to a managed namespace
    #[serde(default)]
    pub namespace_id: Option<String>,
}

/// Per-org branded login page served from an exit node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPage {
    pub login_page_id: LoginPageId,
    pub exit_node_id: ExitNodeId,
    #[serde(default)]
    pub full_domain: Option<String>,
    #[serde(default)]
    pub domain_id: Option<DomainId>,
}

/// One resource x target x site join row, the compiler's input unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTargetRow {
    pub resource: Resource,
    pub target: Target,
    pub site: Site,
    pub domain: Option<Domain>,
}

/// A certificate as served by the remote certificate source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    /// Domain the certificate was issued for
    pub domain: String,
    /// Domain the caller asked about, when it differs (wildcard hits)
    #[serde(default)]
    pub queried_domain: Option<String>,
    #[serde(default)]
    pub wildcard: bool,
    pub cert_pem: String,
    pub key_pem: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    pub fn queried(&self) -> &str {
        self.queried_domain.as_deref().unwrap_or(&self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_allowed_ip_strips_prefix() {
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
        assert_eq!(client.allowed_ip(), "100.90.128.2/32");
    }

    #[test]
    fn test_exit_node_org_gating() {
        let mut node = ExitNode {
            exit_node_id: ExitNodeId::new(1),
            name: "edge".into(),
            public_key: "pk".into(),
            endpoint: "relay.example.com".into(),
            address: None,
            listen_port: None,
            reachable_at: None,
            allowed_orgs: None,
        };
        assert!(node.allows_org(&OrgId::new("a")));

        node.allowed_orgs = Some(vec![OrgId::new("b")]);
        assert!(!node.allows_org(&OrgId::new("a")));
        assert!(node.allows_org(&OrgId::new("b")));
        assert_eq!(node.relay_endpoint(21820), "relay.example.com:21820");
    }

    #[test]
    fn test_resource_defaults_from_json() {
        let resource: Resource = serde_json::from_str(
            r#"{"resourceId":1,"orgId":"org","name":"App","fullDomain":"app.example.com"}"#,
        )
        .unwrap();
        assert!(resource.http);
        assert!(resource.enabled);
        assert!(!resource.ssl);
        assert_eq!(resource.protocol, TransportProtocol::Tcp);
    }
}
