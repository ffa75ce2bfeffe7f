//! One-level wildcard coverage

use std::collections::BTreeMap;

use super::local::LocalCertificate;

/// Whether a wildcard certificate for `cert_domain` serves `domain`.
///
/// Only direct children match: `a.example.com` is covered by
/// `example.com`, `a.b.example.com` and `example.com` itself are not.
pub fn is_covered(domain: &str, cert_domain: &str) -> bool {
    domain
        .strip_suffix(cert_domain)
        .and_then(|rest| rest.strip_suffix('.'))
        .map_or(false, |label| !label.is_empty() && !label.contains('.'))
}

/// Wildcard certificate on disk that covers `domain`, if any
pub fn covering<'a>(
    domain: &str,
    local: &'a BTreeMap<String, LocalCertificate>,
) -> Option<&'a str> {
    local
        .iter()
        .filter(|(_, cert)| cert.exists && cert.wildcard)
        .find(|(cert_domain, _)| is_covered(domain, cert_domain))
        .map(|(cert_domain, _)| cert_domain.as_str())
}

pub fn is_covered_by_any(domain: &str, local: &BTreeMap<String, LocalCertificate>) -> bool {
    covering(domain, local).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wildcard(exists: bool) -> LocalCertificate {
        LocalCertificate {
            exists,
            last_modified: None,
            expires_at: None,
            wildcard: true,
        }
    }

    #[test]
    fn test_is_covered_one_level_only() {
        assert!(is_covered("a.example.com", "example.com"));
        assert!(!is_covered("a.b.example.com", "example.com"));
        assert!(!is_covered("example.com", "example.com"));
        assert!(!is_covered("badexample.com", "example.com"));
        assert!(!is_covered(".example.com", "example.com"));
    }

    #[test]
    fn test_covering_requires_existing_wildcard() {
        let mut local = BTreeMap::new();
        local.insert("example.com".to_string(), wildcard(false));
        assert!(!is_covered_by_any("a.example.com", &local));

        local.insert("example.com".to_string(), wildcard(true));
        assert_eq!(covering("a.example.com", &local), Some("example.com"));

        let mut plain = wildcard(true);
        plain.wildcard = false;
        local.insert("example.org".to_string(), plain);
        assert!(!is_covered_by_any("a.example.org", &local));
    }
}
