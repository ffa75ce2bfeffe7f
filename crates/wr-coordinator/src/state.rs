//! Global coordinator state

use std::sync::Arc;

use wr_core::config::CoordinatorConfig;
use wr_core::traits::{CertificateSource, MeshStore, PeerBus, ProxyStore, SessionValidator};
use wr_core::{MemoryStore, MeshError};

use crate::association::AssociationCache;
use crate::certs::{CertificateManager, HttpCertificateSource};
use crate::connection::PeerConnections;
use crate::dispatch::Dispatcher;
use crate::holepunch::HolePunchCoordinator;
use crate::messenger::PeerMessenger;
use crate::monitor::Monitor;
use crate::proxy::{CompileOptions, ProxyConfigCompiler};
use crate::registration::RegistrationOrchestrator;
use crate::relay::RelayOrchestrator;

/// Every long-lived component, wired against one store
pub struct CoordinatorState {
    pub config: CoordinatorConfig,
    pub connections: Arc<PeerConnections>,
    pub associations: Arc<AssociationCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<Monitor>,
}

impl CoordinatorState {
    /// Wire the components over a [`MemoryStore`]
    pub fn new(config: CoordinatorConfig, store: Arc<MemoryStore>) -> Result<Self, MeshError> {
        let certificates: Option<Arc<dyn CertificateSource>> =
            match &config.certificates.remote_endpoint {
                Some(endpoint) => Some(Arc::new(HttpCertificateSource::new(endpoint.clone())?)),
                None => None,
            };
        Ok(Self::with_parts(
            config,
            store.clone(),
            store.clone(),
            store,
            certificates,
        ))
    }

    pub fn with_parts(
        config: CoordinatorConfig,
        store: Arc<dyn MeshStore>,
        proxy_store: Arc<dyn ProxyStore>,
        sessions: Arc<dyn SessionValidator>,
        certificates: Option<Arc<dyn CertificateSource>>,
    ) -> Self {
        let connections = Arc::new(PeerConnections::new());
        let associations = Arc::new(AssociationCache::new());
        let bus: Arc<dyn PeerBus> = connections.clone();
        let messenger = PeerMessenger::new(bus, store.clone());

        let holepunch = HolePunchCoordinator::new(
            store.clone(),
            sessions.clone(),
            associations.clone(),
            messenger.clone(),
        );
        let relay = RelayOrchestrator::new(
            store.clone(),
            associations.clone(),
            messenger.clone(),
            config.relay.clients_start_port,
        );
        let registration = RegistrationOrchestrator::new(
            store.clone(),
            sessions.clone(),
            associations.clone(),
            messenger,
            config.relay.clone(),
            config.flags.do_not_create_new_client,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            sessions,
            holepunch,
            relay,
            registration,
        ));

        let manager = match (&certificates, config.certificates.managed) {
            (Some(source), true) => Some(Arc::new(CertificateManager::new(
                &config.certificates,
                source.clone(),
            ))),
            (None, true) => {
                tracing::warn!("Managed certificates enabled without a remote endpoint");
                None
            }
            _ => None,
        };
        let compiler = ProxyConfigCompiler::new(
            proxy_store,
            certificates,
            CompileOptions::from_config(&config),
        );
        let monitor = Arc::new(Monitor::new(&config, store, compiler, manager));

        Self {
            config,
            connections,
            associations,
            dispatcher,
            monitor,
        }
    }
}
