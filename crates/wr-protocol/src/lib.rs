//! wr-protocol: Message-bus protocol for the warren tunnel mesh
//!
//! Agents ("newt" sites and "olm" clients) and exit nodes exchange JSON
//! envelopes of the shape `{ "type": ..., "data": ... }` with the
//! coordinator. This crate defines those envelopes and a length-prefixed
//! codec for carrying them over stream transports.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod peer;

pub use codec::EnvelopeCodec;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{
    decode_envelope, encode_envelope, AgentHello, ClientConnect, ClientPeerRemove,
    ClientPeerUpdate, ClientRegisterRequest, ClientSitePeer, Envelope, HolePunchAll,
    HolePunchReport, HolePunchTarget, InboundMessage, OutboundMessage, PeerDestination,
    PeerDestinations, RelayParams, RelayRequest, ServerPeerAddRequest, SiteAlias,
    SiteConfigRequest, SitePeer, SitePeerRemove, SitePeerUpdate, SiteReceiveConfig, SiteTargets,
    UnrelayParams,
};
pub use peer::{PeerId, PeerKind};
