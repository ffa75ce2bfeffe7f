//! Live agent connections

mod pool;

pub use pool::{PeerConnections, PEER_CHANNEL_CAPACITY};
