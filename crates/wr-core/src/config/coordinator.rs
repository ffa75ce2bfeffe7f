//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the coordinator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address the agent stream listener binds to
    pub bind_address: String,

    /// Exit node the monitor loop compiles proxy config for
    pub exit_node_name: Option<String>,

    /// JSON snapshot of the mesh store
    pub snapshot_path: PathBuf,

    pub relay: RelayConfig,

    pub proxy: ProxyConfig,

    pub certificates: CertificateConfig,

    pub server: ServerConfig,

    pub flags: FlagsConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8484".to_string(),
            exit_node_name: None,
            snapshot_path: super::default_config_dir().join("mesh.json"),
            relay: RelayConfig::default(),
            proxy: ProxyConfig::default(),
            certificates: CertificateConfig::default(),
            server: ServerConfig::default(),
            flags: FlagsConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Base URL of the internal API the `badger` middleware calls back into
    pub fn internal_api_base_url(&self) -> String {
        format!(
            "http://{}:{}/api/v1",
            self.server.internal_hostname, self.server.internal_port
        )
    }
}

/// Relay and hole-punch parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// UDP port relayed clients reach exit nodes on
    pub clients_start_port: u16,

    /// Max age of a client's last hole punch when it registers
    #[serde(with = "duration_secs")]
    pub register_punch_window: Duration,

    /// Max age of a site's last hole punch when it asks for config
    #[serde(with = "duration_secs")]
    pub config_punch_window: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            clients_start_port: 21820,
            register_punch_window: Duration::from_secs(5),
            config_punch_window: Duration::from_secs(6),
        }
    }
}

/// Reverse-proxy compiler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http_entrypoint: String,
    pub https_entrypoint: String,
    /// Default certificate resolver in self-resolved TLS mode
    pub cert_resolver: String,
    pub prefer_wildcard_cert: bool,
    /// Appended after `badger` on every HTTP router
    pub additional_middlewares: Vec<String>,
    /// Site types whose targets are routed
    pub site_types: Vec<String>,
    pub pp_transport_prefix: String,
    pub allow_raw_resources: bool,
    pub allow_maintenance_page: bool,
    pub sticky_cookie_name: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_entrypoint: "web".to_string(),
            https_entrypoint: "websecure".to_string(),
            cert_resolver: "letsencrypt".to_string(),
            prefer_wildcard_cert: false,
            additional_middlewares: Vec::new(),
            site_types: vec!["newt".to_string(), "wireguard".to_string(), "local".to_string()],
            pp_transport_prefix: "pp-transport-v".to_string(),
            allow_raw_resources: true,
            allow_maintenance_page: true,
            sticky_cookie_name: "p_sticky".to_string(),
        }
    }
}

/// Certificate manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Root of the `{domain}/{cert.pem,key.pem,...}` tree
    pub certificates_path: PathBuf,

    /// TLS certificates document written for the proxy
    pub dynamic_cert_config_path: PathBuf,

    /// Routing document written for the proxy
    pub dynamic_router_config_path: PathBuf,

    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    /// Pause after each cycle so the proxy can pick up file changes
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// Base URL of the remote certificate source
    pub remote_endpoint: Option<String>,

    /// Certificates are issued remotely; routes need an exact valid cert
    pub managed: bool,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        let dir = super::default_config_dir();

        Self {
            certificates_path: dir.join("certificates"),
            dynamic_cert_config_path: dir.join("dynamic").join("cert_config.yml"),
            dynamic_router_config_path: dir.join("dynamic").join("router_config.yml"),
            monitor_interval: Duration::from_millis(5000),
            settle_delay: Duration::from_millis(500),
            remote_endpoint: None,
            managed: false,
        }
    }
}

/// Internal server coordinates referenced from the generated config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub internal_hostname: String,
    pub internal_port: u16,
    /// Port of the web frontend (maintenance and login pages)
    pub next_port: u16,
    pub session_cookie_name: String,
    pub resource_access_token_param: String,
    pub resource_session_request_param: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            internal_hostname: "pangolin".to_string(),
            internal_port: 3001,
            next_port: 3002,
            session_cookie_name: "p_session_token".to_string(),
            resource_access_token_param: "p_token".to_string(),
            resource_session_request_param: "resource_session_request_param".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// Route `local` sites that have no exit node
    pub allow_undefined_local_sites: bool,
    /// Drop resources whose domain belongs to a managed namespace
    pub filter_namespace_domains: bool,
    pub generate_login_pages: bool,
    /// Never create a client when an olm switches orgs
    pub do_not_create_new_client: bool,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            allow_undefined_local_sites: true,
            filter_namespace_domains: false,
            generate_login_pages: false,
            do_not_create_new_client: true,
        }
    }
}
