//! Periodic proxy config and certificate reconciliation
//!
//! Each cycle compiles the routing document for this exit node, lets the
//! certificate manager catch up with the routed domains, writes the
//! document when it changed, and tells the exit node which SNI names it
//! serves. Cycles are aligned to wall-clock multiples of the interval.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use wr_core::config::CoordinatorConfig;
use wr_core::model::ExitNode;
use wr_core::traits::MeshStore;
use wr_core::MeshError;

use crate::certs::{write_yaml_if_changed, CertificateManager};
use crate::proxy::ProxyConfigCompiler;

const SNI_TIMEOUT: Duration = Duration::from_secs(10);

/// Summary of one monitor cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub domains: BTreeSet<String>,
    pub domains_changed: bool,
    pub router_config_written: bool,
}

pub struct Monitor {
    store: Arc<dyn MeshStore>,
    compiler: ProxyConfigCompiler,
    certificates: Option<Arc<CertificateManager>>,
    http: reqwest::Client,
    exit_node_name: Option<String>,
    router_config_path: PathBuf,
    interval: Duration,
    settle_delay: Duration,
    active_domains: Mutex<BTreeSet<String>>,
}

impl Monitor {
    pub fn new(
        config: &CoordinatorConfig,
        store: Arc<dyn MeshStore>,
        compiler: ProxyConfigCompiler,
        certificates: Option<Arc<CertificateManager>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SNI_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            store,
            compiler,
            certificates,
            http,
            exit_node_name: config.exit_node_name.clone(),
            router_config_path: config.certificates.dynamic_router_config_path.clone(),
            interval: config.certificates.monitor_interval,
            settle_delay: config.certificates.settle_delay,
            active_domains: Mutex::new(BTreeSet::new()),
        }
    }

    /// Run cycles until cancelled.
    ///
    /// The first cycle runs right away so a fresh start serves routes without
    /// waiting out an interval; later cycles start on interval boundaries.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Some(manager) = &self.certificates {
            if let Err(e) = manager.start().await {
                tracing::error!("Certificate manager failed to start: {}", e);
            }
        }
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Monitor started");

        loop {
            if let Err(e) = self.run_cycle(Utc::now()).await {
                tracing::warn!("Monitor cycle failed: {}", e);
            }

            let delay = next_tick_delay(Utc::now(), self.interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Monitor shutting down");
                    break;
                }
            }
        }

        if let Some(manager) = &self.certificates {
            manager.stop();
        }
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<MonitorReport, MeshError> {
        let exit_node = self.exit_node().await?;
        let doc = self.compiler.compile(exit_node.exit_node_id).await?;
        let domains = doc.host_domains();

        let domains_changed = {
            let mut active = self.active_domains.lock().await;
            let changed = *active != domains;
            if changed {
                tracing::info!(
                    domains = domains.len(),
                    previous = active.len(),
                    "Active domains changed"
                );
                *active = domains.clone();
            }
            changed
        };

        if let Some(manager) = &self.certificates {
            let report = manager.run_cycle(&domains, now).await;
            if report.failures > 0 {
                tracing::warn!(failures = report.failures, "Certificate cycle finished with failures");
            }
            // give the proxy time to load new certificates before routes use them
            tokio::time::sleep(self.settle_delay).await;
        }

        let router_config_written = write_yaml_if_changed(&self.router_config_path, &doc).await?;

        self.notify_local_snis(&exit_node, &domains).await;

        Ok(MonitorReport {
            domains,
            domains_changed,
            router_config_written,
        })
    }

    /// Refetch every certificate for the currently routed domains
    pub async fn force_refresh(&self) -> Result<(), MeshError> {
        let Some(manager) = &self.certificates else {
            return Ok(());
        };
        let exit_node = self.exit_node().await?;
        let doc = self.compiler.compile(exit_node.exit_node_id).await?;
        manager.force_refresh(&doc.host_domains(), Utc::now()).await;
        Ok(())
    }

    async fn exit_node(&self) -> Result<ExitNode, MeshError> {
        let node = match &self.exit_node_name {
            Some(name) => self.store.exit_node_by_name(name).await?,
            None => self.store.first_exit_node().await?,
        };
        node.ok_or_else(|| {
            MeshError::not_found("exit node", self.exit_node_name.as_deref().unwrap_or("<any>"))
        })
    }

    /// POST the served domains to the exit node; failures are logged only
    async fn notify_local_snis(&self, exit_node: &ExitNode, domains: &BTreeSet<String>) {
        let Some(base) = exit_node.reachable_at.as_deref().filter(|b| !b.is_empty()) else {
            tracing::debug!(exit_node = %exit_node.name, "Exit node has no control address");
            return;
        };
        let url = format!("{}/update-local-snis", base.trim_end_matches('/'));
        let body = serde_json::json!({ "fullDomains": domains });

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(%url, domains = domains.len(), "Updated local SNIs");
            }
            Ok(response) => {
                tracing::warn!(%url, status = %response.status(), "Exit node rejected SNI update");
            }
            Err(e) => tracing::warn!(%url, "Failed to update local SNIs: {}", e),
        }
    }
}

/// Time until the next wall-clock multiple of `interval`.
///
/// On an exact boundary a full interval is returned.
pub fn next_tick_delay(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let remainder = now_ms.rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - remainder) as u64)
}
