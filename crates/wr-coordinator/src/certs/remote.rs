//! Certificate source backed by the remote management API

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error};

use wr_core::model::CertificateRecord;
use wr_core::traits::CertificateSource;
use wr_core::MeshError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CertificatesResponse {
    #[serde(default)]
    data: Vec<RemoteCertificate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCertificate {
    domain: String,
    #[serde(default)]
    queried_domain: Option<String>,
    #[serde(default)]
    wildcard: bool,
    cert_file: Option<String>,
    key_file: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl RemoteCertificate {
    /// `None` when the certificate has not been issued yet
    fn into_record(self) -> Option<CertificateRecord> {
        Some(CertificateRecord {
            cert_pem: self.cert_file.filter(|pem| !pem.is_empty())?,
            key_pem: self.key_file.filter(|pem| !pem.is_empty())?,
            domain: self.domain,
            queried_domain: self.queried_domain,
            wildcard: self.wildcard,
            expires_at: self.expires_at,
            updated_at: self.updated_at,
        })
    }
}

/// `GET {endpoint}/api/v1/hybrid/certificates/domains?domains=...`
pub struct HttpCertificateSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCertificateSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, MeshError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MeshError::TransientIo(e.to_string()))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CertificateSource for HttpCertificateSource {
    async fn fetch_valid_certificates(
        &self,
        domains: &BTreeSet<String>,
    ) -> Result<Vec<CertificateRecord>, MeshError> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/v1/hybrid/certificates/domains", self.endpoint);
        let query: Vec<(&str, &str)> = domains.iter().map(|d| ("domains", d.as_str())).collect();

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| MeshError::TransientIo(format!("certificate fetch failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, domains = domains.len(), "Certificate source rejected request");
            return Ok(Vec::new());
        }

        let body: CertificatesResponse = response
            .json()
            .await
            .map_err(|e| MeshError::TransientIo(format!("invalid certificate response: {}", e)))?;

        let records: Vec<_> = body
            .data
            .into_iter()
            .filter_map(RemoteCertificate::into_record)
            .collect();
        debug!(requested = domains.len(), received = records.len(), "Fetched certificates");
        Ok(records)
    }
}
