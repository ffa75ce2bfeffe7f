//! Router TLS blocks

use wr_core::config::ProxyConfig;
use wr_core::model::{CertificateRecord, Domain, Resource};

use super::document::{RouterTls, TlsDomain};

/// Wildcard the resolver should request for `full_domain`.
///
/// Two-label domains get `*.` prefixed to the whole name; longer ones drop
/// their first label. A resource without a subdomain uses its domain as is.
pub fn wildcard_candidate(full_domain: &str, has_subdomain: bool) -> String {
    if !has_subdomain {
        return full_domain.to_string();
    }

    let parts: Vec<&str> = full_domain.split('.').collect();
    if parts.len() <= 2 {
        format!("*.{}", full_domain)
    } else {
        format!("*.{}", parts[1..].join("."))
    }
}

/// TLS block for a resolver-issued certificate
pub fn self_resolved(
    resource: &Resource,
    full_domain: &str,
    domain: Option<&Domain>,
    config: &ProxyConfig,
) -> RouterTls {
    let resolver = domain
        .and_then(|d| d.cert_resolver.as_deref())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(config.cert_resolver.as_str());
    let prefer_wildcard = domain
        .and_then(|d| d.prefer_wildcard_cert)
        .unwrap_or(config.prefer_wildcard_cert);

    let has_subdomain = resource
        .subdomain
        .as_deref()
        .map_or(false, |s| !s.is_empty());
    let domains = if prefer_wildcard {
        vec![TlsDomain {
            main: wildcard_candidate(full_domain, has_subdomain),
        }]
    } else {
        Vec::new()
    };

    RouterTls {
        cert_resolver: Some(resolver.to_string()),
        domains,
    }
}

/// Empty TLS block if a valid certificate was fetched for `full_domain`
pub fn managed(full_domain: &str, certificates: &[CertificateRecord]) -> Option<RouterTls> {
    certificates
        .iter()
        .any(|cert| cert.queried() == full_domain)
        .then(RouterTls::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wr_core::types::TransportProtocol;
    use wr_core::{DomainId, OrgId, ResourceId};

    fn resource(subdomain: Option<&str>) -> Resource {
        Resource {
            resource_id: ResourceId::new(1),
            org_id: OrgId::new("org"),
            name: "app".into(),
            full_domain: Some("app.example.com".into()),
            subdomain: subdomain.map(Into::into),
            domain_id: Some(DomainId::new("d")),
            http: true,
            ssl: true,
            protocol: TransportProtocol::Tcp,
            proxy_port: None,
            enabled: true,
            enable_proxy: true,
            sticky_session: false,
            tls_server_name: None,
            set_host_header: None,
            headers: None,
            proxy_protocol: false,
            proxy_protocol_version: None,
            maintenance_mode_enabled: false,
            maintenance_mode_type: None,
        }
    }

    fn domain(resolver: Option<&str>, wildcard: Option<bool>) -> Domain {
        Domain {
            domain_id: DomainId::new("d"),
            base_domain: "example.com".into(),
            cert_resolver: resolver.map(Into::into),
            prefer_wildcard_cert: wildcard,
            namespace_id: None,
        }
    }

    #[test]
    fn test_wildcard_candidate() {
        assert_eq!(wildcard_candidate("app.example.com", true), "*.example.com");
        assert_eq!(wildcard_candidate("example.com", true), "*.example.com");
        assert_eq!(wildcard_candidate("example.com", false), "example.com");
        // multi-label public suffixes are not special-cased
        assert_eq!(wildcard_candidate("app.example.co.uk", true), "*.example.co.uk");
        assert_eq!(wildcard_candidate("example.co.uk", true), "*.co.uk");
    }

    #[test]
    fn test_global_resolver_without_wildcard() {
        let tls = self_resolved(
            &resource(Some("app")),
            "app.example.com",
            None,
            &ProxyConfig::default(),
        );
        assert_eq!(tls.cert_resolver.as_deref(), Some("letsencrypt"));
        assert!(tls.domains.is_empty());
    }

    #[test]
    fn test_domain_overrides_resolver_and_wildcard() {
        let d = domain(Some("  dns  "), Some(true));
        let tls = self_resolved(
            &resource(Some("app")),
            "app.example.com",
            Some(&d),
            &ProxyConfig::default(),
        );
        assert_eq!(tls.cert_resolver.as_deref(), Some("dns"));
        assert_eq!(tls.domains[0].main, "*.example.com");
    }

    #[test]
    fn test_domain_can_opt_out_of_global_wildcard() {
        let config = ProxyConfig {
            prefer_wildcard_cert: true,
            ..ProxyConfig::default()
        };
        let d = domain(None, Some(false));
        let tls = self_resolved(&resource(Some("app")), "app.example.com", Some(&d), &config);
        assert!(tls.domains.is_empty());
    }

    #[test]
    fn test_managed_requires_queried_match() {
        let cert = CertificateRecord {
            domain: "example.com".into(),
            queried_domain: Some("app.example.com".into()),
            wildcard: true,
            cert_pem: String::new(),
            key_pem: String::new(),
            expires_at: None,
            updated_at: None,
        };
        assert_eq!(
            managed("app.example.com", std::slice::from_ref(&cert)),
            Some(RouterTls::default())
        );
        assert_eq!(managed("other.example.com", &[cert]), None);
    }
}
