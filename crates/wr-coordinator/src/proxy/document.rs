//! Typed dynamic configuration document
//!
//! Every section is keyed by generated names in a `BTreeMap`, so the YAML
//! rendering of a document is a pure function of its contents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Full routing document consumed by the reverse proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyDocument {
    pub http: HttpSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<UdpSection>,
}

impl ProxyDocument {
    /// Domains named by a `Host(...)` matcher of any HTTP router
    pub fn host_domains(&self) -> BTreeSet<String> {
        static HOST: OnceLock<Option<Regex>> = OnceLock::new();
        let Some(host) = HOST.get_or_init(|| Regex::new(r"Host\(`([^`]+)`\)").ok()) else {
            return BTreeSet::new();
        };

        self.http
            .routers
            .values()
            .filter_map(|router| host.captures(&router.rule))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSection {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routers: BTreeMap<String, HttpRouter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, HttpService>,
    #[serde(default)]
    pub middlewares: BTreeMap<String, Middleware>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers_transports: BTreeMap<String, ServersTransport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouter {
    pub entry_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
    pub service: String,
    pub rule: String,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,
}

/// Router TLS block; an empty block serves a certificate from the TLS
/// document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_resolver: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<TlsDomain>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsDomain {
    pub main: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpService {
    pub load_balancer: HttpLoadBalancer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpLoadBalancer {
    pub servers: Vec<UrlServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_host_header: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky: Option<CookieSticky>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers_transport: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlServer {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSticky {
    pub cookie: StickyCookie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyCookie {
    pub name: String,
    pub secure: bool,
    pub http_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServersTransport {
    pub server_name: String,
    pub insecure_skip_verify: bool,
}

/// HTTP middleware, rendered as `{kind: {...}}`.
///
/// Exactly one field is set; build values with the constructors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Middleware {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_scheme: Option<RedirectScheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_regex: Option<RedirectRegex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_path_regex: Option<ReplacePathRegex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<StripPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_prefix: Option<AddPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<BTreeMap<String, AuthPlugin>>,
}

impl Middleware {
    pub fn redirect_scheme(scheme: &str) -> Self {
        Self {
            redirect_scheme: Some(RedirectScheme {
                scheme: scheme.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn redirect_regex(regex: &str, replacement: &str, permanent: bool) -> Self {
        Self {
            redirect_regex: Some(RedirectRegex {
                regex: regex.to_string(),
                replacement: replacement.to_string(),
                permanent,
            }),
            ..Self::default()
        }
    }

    pub fn replace_path_regex(regex: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            replace_path_regex: Some(ReplacePathRegex {
                regex: regex.into(),
                replacement: replacement.into(),
            }),
            ..Self::default()
        }
    }

    pub fn strip_prefix(prefix: impl Into<String>) -> Self {
        Self {
            strip_prefix: Some(StripPrefix {
                prefixes: vec![prefix.into()],
            }),
            ..Self::default()
        }
    }

    pub fn add_prefix(prefix: impl Into<String>) -> Self {
        Self {
            add_prefix: Some(AddPrefix {
                prefix: prefix.into(),
            }),
            ..Self::default()
        }
    }

    pub fn request_headers(headers: BTreeMap<String, String>) -> Self {
        Self {
            headers: Some(Headers {
                custom_request_headers: headers,
            }),
            ..Self::default()
        }
    }

    pub fn plugin(name: &str, settings: AuthPlugin) -> Self {
        Self {
            plugin: Some(BTreeMap::from([(name.to_string(), settings)])),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectScheme {
    pub scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRegex {
    pub regex: String,
    pub replacement: String,
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePathRegex {
    pub regex: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripPrefix {
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPrefix {
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    pub custom_request_headers: BTreeMap<String, String>,
}

/// Settings of the forward-auth plugin every HTTP router passes through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPlugin {
    pub api_base_url: String,
    pub user_session_cookie_name: String,
    pub access_token_query_param: String,
    pub resource_session_request_param: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpSection {
    #[serde(default)]
    pub routers: BTreeMap<String, TcpRouter>,
    #[serde(default)]
    pub services: BTreeMap<String, StreamService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouter {
    pub entry_points: Vec<String>,
    pub service: String,
    pub rule: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UdpSection {
    #[serde(default)]
    pub routers: BTreeMap<String, UdpRouter>,
    #[serde(default)]
    pub services: BTreeMap<String, StreamService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpRouter {
    pub entry_points: Vec<String>,
    pub service: String,
}

/// Load-balanced raw TCP or UDP service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamService {
    pub load_balancer: StreamLoadBalancer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLoadBalancer {
    pub servers: Vec<AddressServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers_transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky: Option<SourceIpSticky>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressServer {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceIpSticky {
    pub ip_strategy: IpStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpStrategy {
    pub depth: u32,
    pub source_port: bool,
}
