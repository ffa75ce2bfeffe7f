//! Remote certificate source

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::MeshError;
use crate::model::CertificateRecord;

/// Issues and serves certificates for the mesh's domains
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// Currently valid certificates covering any of `domains`.
    ///
    /// A wildcard certificate may be returned for a subdomain request; its
    /// `queried_domain` names the requested domain.
    async fn fetch_valid_certificates(
        &self,
        domains: &BTreeSet<String>,
    ) -> Result<Vec<CertificateRecord>, MeshError>;
}
