//! Router matching rules and priorities

use wr_core::model::Target;
use wr_core::types::PathMatchType;

/// Priority of a router whose target leaves it unset
pub const DEFAULT_PRIORITY: u32 = 100;

/// Priority of a catch-all `/` route
pub const CATCH_ALL_PRIORITY: u32 = 1;

pub fn host_rule(full_domain: &str) -> String {
    format!("Host(`{}`)", full_domain)
}

/// `Host(...)` plus the path clause of the match type, if any
pub fn routing_rule(full_domain: &str, path: Option<&str>, match_type: Option<PathMatchType>) -> String {
    let host = host_rule(full_domain);
    let (Some(path), Some(match_type)) = (path.filter(|p| !p.is_empty()), match_type) else {
        return host;
    };

    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    match match_type {
        PathMatchType::Exact => format!("{} && Path(`{}`)", host, normalized),
        PathMatchType::Prefix => format!("{} && PathPrefix(`{}`)", host, normalized),
        PathMatchType::Regex => format!("{} && PathRegexp(`{}`)", host, path),
    }
}

/// Router priority of a route group.
///
/// An explicit priority other than the default wins. Otherwise a path
/// match adds 10 plus 5/3/2 for exact/prefix/regex, and `/` sinks to 1.
pub fn router_priority(route: &Target) -> u32 {
    if let Some(explicit) = route.priority.filter(|p| *p != 0 && *p != DEFAULT_PRIORITY) {
        return explicit;
    }

    let path = route.path.as_deref().filter(|p| !p.is_empty());
    let (Some(path), Some(match_type)) = (path, route.path_match_type) else {
        return DEFAULT_PRIORITY;
    };
    if path == "/" {
        return CATCH_ALL_PRIORITY;
    }

    DEFAULT_PRIORITY
        + 10
        + match match_type {
            PathMatchType::Exact => 5,
            PathMatchType::Prefix => 3,
            PathMatchType::Regex => 2,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wr_core::{ResourceId, SiteId, TargetId};

    fn route(path: Option<&str>, match_type: Option<PathMatchType>, priority: Option<u32>) -> Target {
        Target {
            target_id: TargetId::new(1),
            resource_id: ResourceId::new(1),
            site_id: SiteId::new(1),
            ip: None,
            method: None,
            port: None,
            internal_port: None,
            enabled: true,
            health: None,
            path: path.map(Into::into),
            path_match_type: match_type,
            rewrite_path: None,
            rewrite_path_type: None,
            priority,
        }
    }

    #[test]
    fn test_priority_by_match_type() {
        let api = Some("/api");
        assert_eq!(router_priority(&route(api, Some(PathMatchType::Exact), None)), 115);
        assert_eq!(router_priority(&route(api, Some(PathMatchType::Prefix), None)), 113);
        assert_eq!(router_priority(&route(api, Some(PathMatchType::Regex), Some(100))), 112);
        assert_eq!(router_priority(&route(None, None, None)), 100);
    }

    #[test]
    fn test_catch_all_and_explicit_priority() {
        for match_type in [PathMatchType::Exact, PathMatchType::Prefix, PathMatchType::Regex] {
            assert_eq!(router_priority(&route(Some("/"), Some(match_type), None)), 1);
        }
        assert_eq!(
            router_priority(&route(Some("/api"), Some(PathMatchType::Exact), Some(500))),
            500
        );
        // a path without a match type does not count
        assert_eq!(router_priority(&route(Some("/api"), None, None)), 100);
    }

    #[test]
    fn test_routing_rule() {
        let d = "app.example.com";
        assert_eq!(routing_rule(d, None, None), "Host(`app.example.com`)");
        assert_eq!(
            routing_rule(d, Some("api"), Some(PathMatchType::Prefix)),
            "Host(`app.example.com`) && PathPrefix(`/api`)"
        );
        assert_eq!(
            routing_rule(d, Some("/health"), Some(PathMatchType::Exact)),
            "Host(`app.example.com`) && Path(`/health`)"
        );
        assert_eq!(
            routing_rule(d, Some("^/v[0-9]+/"), Some(PathMatchType::Regex)),
            "Host(`app.example.com`) && PathRegexp(`^/v[0-9]+/`)"
        );
    }
}
