//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MeshError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Create a new id
            pub fn new(id: u32) -> Self {
                Self(id)
            }

            /// Get the raw numeric id
            pub fn get(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(id: u32) -> Self {
                Self(id)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the raw id string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

numeric_id!(
    /// Client (olm-backed tunnel consumer) identifier
    ClientId
);
numeric_id!(
    /// Site (newt-backed tunnel gateway) identifier
    SiteId
);
numeric_id!(ExitNodeId);
numeric_id!(ResourceId);
numeric_id!(TargetId);
numeric_id!(LoginPageId);
numeric_id!(SiteResourceId);

string_id!(
    /// Organization identifier
    OrgId
);
string_id!(DomainId);
string_id!(UserId);

/// How a site is attached to the mesh.
///
/// Decides how backend URLs are synthesized: `newt` sites are reached
/// through the first address of their tunnel subnet, the others by the
/// target's own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Newt,
    Wireguard,
    Local,
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::Newt => "newt",
            SiteKind::Wireguard => "wireguard",
            SiteKind::Local => "local",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteKind {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newt" => Ok(SiteKind::Newt),
            "wireguard" => Ok(SiteKind::Wireguard),
            "local" => Ok(SiteKind::Local),
            other => Err(MeshError::Validation(format!("unknown site type: {other}"))),
        }
    }
}

/// Transport protocol of a raw (non-HTTP) resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Udp => "udp",
        }
    }
}

/// Result of the most recent target health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// How a target's `path` is matched against the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatchType {
    Exact,
    Prefix,
    Regex,
}

impl PathMatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathMatchType::Exact => "exact",
            PathMatchType::Prefix => "prefix",
            PathMatchType::Regex => "regex",
        }
    }
}

/// How a matched path is rewritten before reaching the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RewritePathType {
    Exact,
    Prefix,
    Regex,
    StripPrefix,
}

impl RewritePathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewritePathType::Exact => "exact",
            RewritePathType::Prefix => "prefix",
            RewritePathType::Regex => "regex",
            RewritePathType::StripPrefix => "stripPrefix",
        }
    }
}

/// When a resource shows its maintenance page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceModeType {
    /// Always
    Forced,
    /// Only while no target can serve traffic
    Automatic,
}

/// Addressing mode of a site resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteResourceMode {
    Host,
    Cidr,
    Port,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id_is_transparent() {
        let id: SiteId = serde_json::from_str("7").unwrap();
        assert_eq!(id, SiteId::new(7));
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn test_site_kind_parse_and_display() {
        assert_eq!("newt".parse::<SiteKind>().unwrap(), SiteKind::Newt);
        assert_eq!(SiteKind::Wireguard.to_string(), "wireguard");
        assert!("gerbil".parse::<SiteKind>().is_err());
    }

    #[test]
    fn test_rewrite_path_type_wire_names() {
        let t: RewritePathType = serde_json::from_str("\"stripPrefix\"").unwrap();
        assert_eq!(t, RewritePathType::StripPrefix);
        assert_eq!(t.as_str(), "stripPrefix");
    }
}
