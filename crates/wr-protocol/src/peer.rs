//! Peer identity on the message bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of agent sits at the other end of a bus connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// A site agent ("newt") exposing resources to the mesh
    Site,
    /// A client agent ("olm") consuming resources through the mesh
    Client,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerKind::Site => write!(f, "newt"),
            PeerKind::Client => write!(f, "olm"),
        }
    }
}

/// Bus-level identifier of an agent session (the newt id or olm id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a new peer ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_kind_display_uses_agent_names() {
        assert_eq!(PeerKind::Site.to_string(), "newt");
        assert_eq!(PeerKind::Client.to_string(), "olm");
    }
}
