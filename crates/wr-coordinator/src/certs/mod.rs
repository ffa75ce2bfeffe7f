//! Certificate lifecycle: remote fetch, local storage, TLS document

pub mod local;
pub mod manager;
pub mod remote;
pub mod tls_document;
pub mod wildcard;

use thiserror::Error;

use wr_core::MeshError;

pub use manager::{CertificateManager, CertificateStatus, CycleReport};
pub use remote::HttpCertificateSource;
pub use tls_document::{write_yaml_if_changed, TlsDocument};

/// Failures of a certificate or dynamic-config cycle
#[derive(Error, Debug)]
pub enum CertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<CertError> for MeshError {
    fn from(err: CertError) -> Self {
        MeshError::TransientIo(err.to_string())
    }
}
