//! Collaborator traits the coordinator is written against

mod bus;
mod certs;
mod session;
mod store;

pub use bus::{PeerBus, SendOutcome};
pub use certs::CertificateSource;
pub use session::SessionValidator;
pub use store::{MeshStore, ProxyStore, Updated};
