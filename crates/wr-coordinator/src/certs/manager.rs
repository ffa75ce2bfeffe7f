//! Keeps the on-disk certificates in step with the active routes

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use wr_core::config::CertificateConfig;
use wr_core::traits::CertificateSource;

use super::local::{self, LocalCertificate};
use super::tls_document::{write_yaml_if_changed, TlsDocument};
use super::wildcard;
use super::CertError;

/// Refetch at least this often even when nothing looks stale
const MAX_FETCH_AGE_HOURS: i64 = 24;

/// Refetch certificates expiring sooner than this
const RENEW_BEFORE_DAYS: i64 = 30;

#[derive(Debug, Default)]
struct ManagerState {
    local: BTreeMap<String, LocalCertificate>,
    last_fetch: Option<DateTime<Utc>>,
    /// Domains requested at the last fetch
    last_known: BTreeSet<String>,
    /// Domains of the most recent cycle
    active: BTreeSet<String>,
}

impl ManagerState {
    /// Domains no wildcard certificate on disk serves
    fn needing(&self, domains: &BTreeSet<String>) -> BTreeSet<String> {
        domains
            .iter()
            .filter(|d| !wildcard::is_covered_by_any(d, &self.local))
            .cloned()
            .collect()
    }

    fn should_fetch(&self, domains: &BTreeSet<String>, now: DateTime<Utc>) -> bool {
        let Some(last_fetch) = self.last_fetch else {
            return true;
        };
        if now - last_fetch > chrono::Duration::hours(MAX_FETCH_AGE_HOURS) {
            return true;
        }

        let needing = self.needing(domains);
        if needing != self.needing(&self.last_known) {
            return true;
        }

        needing.iter().any(|domain| match self.local.get(domain) {
            None => true,
            Some(cert) if !cert.exists => true,
            Some(cert) => cert
                .expires_at
                .map_or(false, |expires| expires - now < chrono::Duration::days(RENEW_BEFORE_DAYS)),
        })
    }

    /// Replace the scanned view, keeping expiry dates learned from the source
    fn merge_scan(&mut self, scanned: BTreeMap<String, LocalCertificate>) {
        let previous = std::mem::take(&mut self.local);
        self.local = scanned
            .into_iter()
            .map(|(domain, mut cert)| {
                cert.expires_at = previous.get(&domain).and_then(|p| p.expires_at);
                (domain, cert)
            })
            .collect();
    }
}

/// Outcome of one lifecycle cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: bool,
    pub written: Vec<String>,
    pub removed: Vec<String>,
    pub tls_document_written: bool,
    /// Steps or domains that failed and were skipped
    pub failures: usize,
}

/// Snapshot for status endpoints and logs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    pub running: bool,
    pub active_domains: Vec<String>,
    pub monitor_interval_ms: u64,
    pub last_fetch: Option<DateTime<Utc>>,
    pub local_certificates: usize,
    pub wildcard_certificates: Vec<String>,
    pub domains_covered_by_wildcards: Vec<String>,
}

/// Fetches, writes and prunes certificates for the routed domains.
///
/// All state sits behind one async mutex; cycles never overlap.
pub struct CertificateManager {
    root: PathBuf,
    tls_document_path: PathBuf,
    monitor_interval: Duration,
    source: Arc<dyn CertificateSource>,
    running: AtomicBool,
    state: Mutex<ManagerState>,
}

impl CertificateManager {
    pub fn new(config: &CertificateConfig, source: Arc<dyn CertificateSource>) -> Self {
        Self {
            root: config.certificates_path.clone(),
            tls_document_path: config.dynamic_cert_config_path.clone(),
            monitor_interval: config.monitor_interval,
            source,
            running: AtomicBool::new(false),
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Create the certificate root and load what is already there
    pub async fn start(&self) -> Result<(), CertError> {
        fs::create_dir_all(&self.root).await?;
        let scanned = local::scan(&self.root).await?;

        let mut state = self.state.lock().await;
        info!(
            root = %self.root.display(),
            certificates = scanned.len(),
            "Certificate manager started"
        );
        state.merge_scan(scanned);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Certificate manager stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn should_fetch(&self, domains: &BTreeSet<String>, now: DateTime<Utc>) -> bool {
        self.state.lock().await.should_fetch(domains, now)
    }

    /// Fetch what is stale, write what changed, then rebuild the TLS
    /// document and prune directories no route needs.
    ///
    /// Every step runs even when an earlier one failed; failures are logged
    /// and counted in the report.
    pub async fn run_cycle(&self, domains: &BTreeSet<String>, now: DateTime<Utc>) -> CycleReport {
        let mut state = self.state.lock().await;
        let mut report = CycleReport::default();

        match local::scan(&self.root).await {
            Ok(scanned) => state.merge_scan(scanned),
            Err(e) => {
                warn!(error = %e, root = %self.root.display(), "Certificate scan failed, keeping previous view");
                report.failures += 1;
            }
        }
        state.active = domains.clone();

        if state.should_fetch(domains, now) {
            let to_fetch = state.needing(domains);
            if to_fetch.is_empty() {
                state.last_fetch = Some(now);
                state.last_known = domains.clone();
            } else {
                match self.source.fetch_valid_certificates(&to_fetch).await {
                    Ok(records) => {
                        report.fetched = true;
                        state.last_fetch = Some(now);
                        state.last_known = domains.clone();

                        for record in &records {
                            if !local::should_update(&self.root, record).await {
                                continue;
                            }
                            match local::write_certificate(&self.root, record, now).await {
                                Ok(written) => {
                                    state.local.insert(record.domain.clone(), written);
                                    report.written.push(record.domain.clone());
                                }
                                Err(e) => {
                                    warn!(domain = %record.domain, error = %e, "Failed to write certificate");
                                    report.failures += 1;
                                }
                            }
                        }
                    }
                    // retried next cycle since last_fetch is untouched
                    Err(e) => warn!(error = %e, domains = to_fetch.len(), "Certificate fetch failed"),
                }
            }
        }

        let doc = TlsDocument::build(&self.root, domains, &state.local);
        match write_yaml_if_changed(&self.tls_document_path, &doc).await {
            Ok(written) => report.tls_document_written = written,
            Err(e) => {
                warn!(path = %self.tls_document_path.display(), error = %e, "Failed to write TLS document");
                report.failures += 1;
            }
        }

        self.cleanup(&mut state, domains, &mut report).await;

        if !report.written.is_empty() || !report.removed.is_empty() {
            info!(
                written = report.written.len(),
                removed = report.removed.len(),
                failures = report.failures,
                "Certificate cycle applied changes"
            );
        }
        report
    }

    /// Drop the fetch history so the next cycle fetches unconditionally
    pub async fn force_refresh(&self, domains: &BTreeSet<String>, now: DateTime<Utc>) -> CycleReport {
        {
            let mut state = self.state.lock().await;
            state.last_fetch = None;
            state.last_known.clear();
        }
        info!("Forcing certificate refresh");
        self.run_cycle(domains, now).await
    }

    /// Remove directories that serve no active domain.
    ///
    /// A directory survives if it is an exact match or an existing wildcard
    /// one label above an active domain.
    async fn cleanup(
        &self,
        state: &mut ManagerState,
        domains: &BTreeSet<String>,
        report: &mut CycleReport,
    ) {
        let stale: Vec<String> = state
            .local
            .iter()
            .filter(|(dir, cert)| {
                !domains.contains(*dir)
                    && !(cert.exists
                        && cert.wildcard
                        && domains.iter().any(|d| wildcard::is_covered(d, dir)))
            })
            .map(|(dir, _)| dir.clone())
            .collect();

        for dir in stale {
            if let Err(e) = local::remove_certificate(&self.root, &dir).await {
                warn!(domain = %dir, error = %e, "Failed to remove unused certificate");
                report.failures += 1;
                continue;
            }
            state.local.remove(&dir);
            debug!(domain = %dir, "Removed unused certificate");
            report.removed.push(dir);
        }
    }

    pub async fn status(&self) -> CertificateStatus {
        let state = self.state.lock().await;

        let wildcard_certificates = state
            .local
            .iter()
            .filter(|(_, cert)| cert.exists && cert.wildcard)
            .map(|(domain, _)| domain.clone())
            .collect();
        let domains_covered_by_wildcards = state
            .active
            .iter()
            .filter(|d| wildcard::is_covered_by_any(d, &state.local))
            .cloned()
            .collect();

        CertificateStatus {
            running: self.is_running(),
            active_domains: state.active.iter().cloned().collect(),
            monitor_interval_ms: self.monitor_interval.as_millis() as u64,
            last_fetch: state.last_fetch,
            local_certificates: state.local.len(),
            wildcard_certificates,
            domains_covered_by_wildcards,
        }
    }
}
