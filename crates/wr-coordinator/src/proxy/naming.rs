//! Generated names of routers, services and middlewares

use wr_core::model::Target;
use wr_core::ResourceId;

const MAX_NAME_LEN: usize = 50;

/// Make `input` safe as a config key.
///
/// Truncates to 50 characters, replaces anything outside `[A-Za-z0-9-]` with
/// `-`, collapses dash runs and trims one dash from each end.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_NAME_LEN));
    for c in input.chars().take(MAX_NAME_LEN) {
        let c = if c.is_ascii_alphanumeric() || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let out = out.strip_prefix('-').unwrap_or(&out);
    out.strip_suffix('-').unwrap_or(out).to_string()
}

/// Key grouping the targets of one resource that share a path and rewrite
/// configuration
pub fn route_key(resource_id: ResourceId, target: &Target) -> String {
    let path = target.path.as_deref().map(sanitize).unwrap_or_default();
    let path_key = [
        path.as_str(),
        target.path_match_type.map(|t| t.as_str()).unwrap_or(""),
        target.rewrite_path.as_deref().unwrap_or(""),
        target.rewrite_path_type.map(|t| t.as_str()).unwrap_or(""),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join("-");

    let key = if path_key.is_empty() {
        resource_id.to_string()
    } else {
        format!("{}-{}", resource_id, path_key)
    };
    sanitize(&key)
}

pub fn router_name(key: &str, resource_name: &str) -> String {
    format!("{}-{}-router", key, resource_name)
}

pub fn service_name(key: &str, resource_name: &str) -> String {
    format!("{}-{}-service", key, resource_name)
}

pub fn transport_name(key: &str) -> String {
    format!("{}-transport", key)
}

pub fn headers_middleware_name(key: &str) -> String {
    format!("{}-headers-middleware", key)
}

pub fn rewrite_middleware_name(resource_id: ResourceId, key: &str) -> String {
    format!("rewrite-r{}-{}", resource_id, key)
}
