//! wr-coordinator: Control plane for the warren tunnel mesh
//!
//! The coordinator accepts agent connections, turns hole-punch reports into
//! peer endpoint updates, decides when client/site pairs go through a relay,
//! registers clients onto their sites, and keeps the reverse proxy's dynamic
//! config and certificates in step with the mesh's resources.

pub mod association;
pub mod certs;
pub mod connection;
pub mod dispatch;
pub mod holepunch;
pub mod messenger;
pub mod monitor;
pub mod proxy;
pub mod registration;
pub mod relay;
pub mod server;
pub mod state;

#[cfg(test)]
mod testing;

pub use state::CoordinatorState;
