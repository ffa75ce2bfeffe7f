//! Certificate lifecycle against a mocked certificate API

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wr_coordinator::certs::{CertificateManager, HttpCertificateSource, TlsDocument};
use wr_core::config::CertificateConfig;

const CERTS_PATH: &str = "/api/v1/hybrid/certificates/domains";

fn config(dir: &TempDir) -> CertificateConfig {
    CertificateConfig {
        certificates_path: dir.path().join("certificates"),
        dynamic_cert_config_path: dir.path().join("dynamic").join("cert_config.yml"),
        dynamic_router_config_path: dir.path().join("dynamic").join("router_config.yml"),
        monitor_interval: Duration::from_millis(5000),
        settle_delay: Duration::ZERO,
        remote_endpoint: None,
        managed: true,
    }
}

fn domains(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|d| d.to_string()).collect()
}

async fn manager(server: &MockServer, config: &CertificateConfig) -> CertificateManager {
    let source = HttpCertificateSource::new(server.uri()).expect("http client");
    let manager = CertificateManager::new(config, Arc::new(source));
    manager.start().await.expect("start");
    manager
}

async fn read_tls_document(config: &CertificateConfig) -> TlsDocument {
    let yaml = tokio::fs::read_to_string(&config.dynamic_cert_config_path)
        .await
        .expect("tls document");
    serde_yaml::from_str(&yaml).expect("parse tls document")
}

#[tokio::test]
async fn test_wildcard_serves_sibling_domains() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .and(query_param("domains", "a.example.com"))
        .and(query_param("domains", "b.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{
                "domain": "example.com",
                "queriedDomain": "a.example.com",
                "wildcard": true,
                "certFile": "CERT",
                "keyFile": "KEY",
                "expiresAt": "2099-01-01T00:00:00Z",
                "updatedAt": "2024-01-01T00:00:00Z"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let manager = manager(&server, &config).await;
    let active = domains(&["a.example.com", "b.example.com"]);
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

    let report = manager.run_cycle(&active, now).await;
    assert!(report.fetched);
    assert_eq!(report.written, vec!["example.com"]);
    assert!(report.tls_document_written);

    let cert_dir = config.certificates_path.join("example.com");
    assert_eq!(
        tokio::fs::read_to_string(cert_dir.join("cert.pem")).await.unwrap(),
        "CERT"
    );
    assert_eq!(
        tokio::fs::read_to_string(cert_dir.join(".wildcard")).await.unwrap(),
        "true"
    );

    let doc = read_tls_document(&config).await;
    assert_eq!(doc.tls.certificates.len(), 1);
    assert!(doc.tls.certificates[0].cert_file.ends_with("cert.pem"));
    assert!(doc.tls.certificates[0].key_file.ends_with("key.pem"));

    // both domains are served by the wildcard now, nothing to refetch
    let report = manager
        .run_cycle(&active, now + chrono::Duration::minutes(5))
        .await;
    assert!(!report.fetched);
    assert!(report.removed.is_empty());
    assert!(!report.tls_document_written);

    let status = manager.status().await;
    assert_eq!(status.wildcard_certificates, vec!["example.com"]);
    assert_eq!(status.domains_covered_by_wildcards.len(), 2);
}

#[tokio::test]
async fn test_expiring_certificate_is_refetched() {
    let now = Utc::now();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{
                "domain": "app.example.com",
                "certFile": "CERT",
                "keyFile": "KEY",
                "expiresAt": (now + chrono::Duration::days(10)).to_rfc3339()
            }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let manager = manager(&server, &config).await;
    let active = domains(&["app.example.com"]);

    manager.run_cycle(&active, now).await;
    assert!(manager.should_fetch(&active, now + chrono::Duration::minutes(1)).await);

    let report = manager
        .run_cycle(&active, now + chrono::Duration::minutes(1))
        .await;
    assert!(report.fetched);

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_long_lived_certificate_is_not_refetched() {
    let now = Utc::now();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{
                "domain": "app.example.com",
                "certFile": "CERT",
                "keyFile": "KEY",
                "expiresAt": (now + chrono::Duration::days(40)).to_rfc3339()
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let manager = manager(&server, &config).await;
    let active = domains(&["app.example.com"]);

    manager.run_cycle(&active, now).await;
    assert!(!manager.should_fetch(&active, now + chrono::Duration::hours(1)).await);
    assert!(manager.should_fetch(&active, now + chrono::Duration::hours(25)).await);

    let report = manager
        .run_cycle(&active, now + chrono::Duration::hours(1))
        .await;
    assert!(!report.fetched);
}

#[tokio::test]
async fn test_rejected_request_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let manager = manager(&server, &config).await;

    let report = manager
        .run_cycle(&domains(&["app.example.com"]), Utc::now())
        .await;
    assert!(report.written.is_empty());

    let doc = read_tls_document(&config).await;
    assert!(doc.tls.certificates.is_empty());
    assert!(!config.certificates_path.join("app.example.com").exists());
}

#[tokio::test]
async fn test_removed_route_prunes_certificate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .and(query_param("domains", "old.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{
                "domain": "old.example.com",
                "certFile": "CERT",
                "keyFile": "KEY",
                "expiresAt": "2099-01-01T00:00:00Z"
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .and(query_param("domains", "new.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let manager = manager(&server, &config).await;
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

    manager
        .run_cycle(&domains(&["old.example.com"]), now)
        .await;
    assert!(config.certificates_path.join("old.example.com").exists());

    let report = manager
        .run_cycle(&domains(&["new.example.com"]), now + chrono::Duration::minutes(5))
        .await;
    assert_eq!(report.removed, vec!["old.example.com"]);
    assert!(!config.certificates_path.join("old.example.com").exists());
}

#[tokio::test]
async fn test_cycle_survives_unwritable_domain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                { "domain": "bad.example.com", "certFile": "CERT", "keyFile": "KEY",
                  "expiresAt": "2099-01-01T00:00:00Z" },
                { "domain": "good.example.com", "certFile": "CERT", "keyFile": "KEY",
                  "expiresAt": "2099-01-01T00:00:00Z" }
            ]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let manager = manager(&server, &config).await;
    tokio::fs::write(config.certificates_path.join("bad.example.com"), "not a directory")
        .await
        .unwrap();

    let report = manager
        .run_cycle(&domains(&["bad.example.com", "good.example.com"]), Utc::now())
        .await;
    assert_eq!(report.written, vec!["good.example.com"]);
    assert_eq!(report.failures, 1);
    assert!(report.tls_document_written);

    let doc = read_tls_document(&config).await;
    assert_eq!(doc.tls.certificates.len(), 1);
    assert!(doc.tls.certificates[0]
        .cert_file
        .ends_with("good.example.com/cert.pem"));
}
