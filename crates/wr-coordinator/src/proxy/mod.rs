//! Reverse-proxy configuration compiler

pub mod compile;
pub mod document;
pub mod naming;
pub mod rewrite;
pub mod rules;
pub mod servers;
pub mod tls;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use wr_core::model::{CertificateRecord, LoginPage, ResourceTargetRow};
use wr_core::traits::{CertificateSource, ProxyStore};
use wr_core::{ExitNodeId, MeshError};

pub use compile::{compile, CompileInput, CompileOptions};
pub use document::ProxyDocument;

/// Fetches the compiler inputs from the store and compiles them
pub struct ProxyConfigCompiler {
    store: Arc<dyn ProxyStore>,
    certificates: Option<Arc<dyn CertificateSource>>,
    options: CompileOptions,
}

impl ProxyConfigCompiler {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        certificates: Option<Arc<dyn CertificateSource>>,
        options: CompileOptions,
    ) -> Self {
        Self {
            store,
            certificates,
            options,
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile the routing document for `exit_node_id`
    pub async fn compile(&self, exit_node_id: ExitNodeId) -> Result<ProxyDocument, MeshError> {
        let rows = self.store.resource_rows().await?;
        let login_pages = if self.options.generate_login_pages {
            self.store.login_pages(exit_node_id).await?
        } else {
            Vec::new()
        };
        let certificates = if self.options.managed_certificates {
            self.route_certificates(&rows, &login_pages).await
        } else {
            Vec::new()
        };

        let doc = compile(
            &CompileInput {
                exit_node_id,
                rows: &rows,
                login_pages: &login_pages,
                certificates: &certificates,
            },
            &self.options,
        );
        debug!(
            %exit_node_id,
            routers = doc.http.routers.len(),
            services = doc.http.services.len(),
            "Compiled proxy config"
        );
        Ok(doc)
    }

    /// Valid certificates for every HTTP resource and login page domain
    async fn route_certificates(
        &self,
        rows: &[ResourceTargetRow],
        login_pages: &[LoginPage],
    ) -> Vec<CertificateRecord> {
        let Some(source) = &self.certificates else {
            warn!("Managed certificates enabled without a certificate source");
            return Vec::new();
        };

        let domains: BTreeSet<String> = rows
            .iter()
            .filter(|row| row.resource.enabled && row.resource.http)
            .filter_map(|row| row.resource.full_domain.clone())
            .chain(login_pages.iter().filter_map(|p| p.full_domain.clone()))
            .filter(|d| !d.is_empty())
            .collect();
        if domains.is_empty() {
            return Vec::new();
        }

        match source.fetch_valid_certificates(&domains).await {
            Ok(certificates) => certificates,
            Err(e) => {
                warn!(error = %e, "Failed to fetch certificates for routes");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use wr_core::config::CoordinatorConfig;
    use wr_core::memory::Snapshot;
    use wr_core::MemoryStore;

    struct RecordingSource {
        requested: Mutex<Vec<BTreeSet<String>>>,
    }

    #[async_trait]
    impl CertificateSource for RecordingSource {
        async fn fetch_valid_certificates(
            &self,
            domains: &BTreeSet<String>,
        ) -> Result<Vec<CertificateRecord>, MeshError> {
            self.requested.lock().unwrap().push(domains.clone());
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_empty_store_compiles_fixed_middlewares() {
        let store = Arc::new(MemoryStore::new(Snapshot::default()));
        let options = CompileOptions::from_config(&CoordinatorConfig::default());
        let compiler = ProxyConfigCompiler::new(store, None, options);

        let doc = compiler.compile(ExitNodeId::new(1)).await.unwrap();
        assert!(doc.http.routers.is_empty());
        assert_eq!(doc.http.middlewares.len(), 3);
    }

    #[tokio::test]
    async fn test_managed_mode_skips_fetch_without_domains() {
        let store = Arc::new(MemoryStore::new(Snapshot::default()));
        let source = Arc::new(RecordingSource {
            requested: Mutex::new(Vec::new()),
        });
        let mut options = CompileOptions::from_config(&CoordinatorConfig::default());
        options.managed_certificates = true;
        let compiler = ProxyConfigCompiler::new(store, Some(source.clone()), options);

        compiler.compile(ExitNodeId::new(1)).await.unwrap();
        assert!(source.requested.lock().unwrap().is_empty());
    }
}
