//! Stream transport for agents and exit nodes

mod listener;

pub use listener::AgentListener;
