//! TLS certificates document handed to the proxy

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use super::local::{CertificatePaths, LocalCertificate};
use super::wildcard;
use super::CertError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsDocument {
    pub tls: TlsCertificates,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCertificates {
    #[serde(default)]
    pub certificates: Vec<CertificateFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateFile {
    pub cert_file: String,
    pub key_file: String,
}

impl TlsDocument {
    /// One entry per certificate serving `domains`.
    ///
    /// An exact certificate wins over a wildcard; a wildcard shared by
    /// several domains is listed once.
    pub fn build(
        root: &Path,
        domains: &BTreeSet<String>,
        local: &BTreeMap<String, LocalCertificate>,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let mut certificates = Vec::new();

        for domain in domains {
            let exact = local
                .get(domain)
                .filter(|cert| cert.exists)
                .map(|_| domain.as_str());
            let Some(cert_domain) = exact.or_else(|| wildcard::covering(domain, local)) else {
                continue;
            };

            let paths = CertificatePaths::new(root, cert_domain);
            let cert_file = paths.cert.display().to_string();
            if !seen.insert(cert_file.clone()) {
                continue;
            }
            certificates.push(CertificateFile {
                cert_file,
                key_file: paths.key.display().to_string(),
            });
        }

        Self {
            tls: TlsCertificates { certificates },
        }
    }
}

/// Write `doc` as YAML unless the file already holds an equal document.
///
/// Returns whether the file was written. An unparseable existing file is
/// overwritten.
pub async fn write_yaml_if_changed<T>(path: &Path, doc: &T) -> Result<bool, CertError>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    if let Ok(existing) = fs::read_to_string(path).await {
        if serde_yaml::from_str::<T>(&existing).ok().as_ref() == Some(doc) {
            debug!(path = %path.display(), "Dynamic config unchanged");
            return Ok(false);
        }
    }

    let yaml = serde_yaml::to_string(doc)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, yaml).await?;

    info!(path = %path.display(), "Wrote dynamic config");
    Ok(true)
}
