//! Routing document compilation
//!
//! [`compile`] is a pure function of the joined resource rows, the exit
//! node's login pages and the pre-fetched certificates. Rows are grouped by
//! resource and path configuration; each group becomes either an HTTP
//! router/service pair (plus redirect, rewrite and header middlewares) or a
//! raw TCP/UDP router/service pair.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::{debug, warn};

use wr_core::config::{CoordinatorConfig, ProxyConfig, ServerConfig};
use wr_core::model::{
    CertificateRecord, Domain, LoginPage, Resource, ResourceTargetRow, Target,
};
use wr_core::types::{MaintenanceModeType, TransportProtocol};
use wr_core::{ExitNodeId, SiteKind};

use super::document::{
    AuthPlugin, CookieSticky, HttpLoadBalancer, HttpRouter, HttpService, IpStrategy, Middleware,
    ProxyDocument, RouterTls, ServersTransport, SourceIpSticky, StickyCookie, StreamLoadBalancer,
    StreamService, TcpRouter, UdpRouter, UrlServer,
};
use super::naming::{
    headers_middleware_name, rewrite_middleware_name, route_key, router_name, sanitize,
    service_name, transport_name,
};
use super::rewrite;
use super::rules::{host_rule, router_priority, routing_rule};
use super::servers::{http_servers, stream_servers, Backend};
use super::tls;

pub const AUTH_MIDDLEWARE: &str = "badger";
pub const REDIRECT_HTTPS_MIDDLEWARE: &str = "redirect-to-https";
pub const REDIRECT_ROOT_MIDDLEWARE: &str = "redirect-to-root";

const LANDING_SERVICE: &str = "landing-service";
const MAINTENANCE_PRIORITY: u32 = 2000;
const MAINTENANCE_ASSETS_PRIORITY: u32 = 2001;

/// Inputs of one compilation
#[derive(Debug, Clone, Copy)]
pub struct CompileInput<'a> {
    pub exit_node_id: ExitNodeId,
    /// Join rows ordered by descending target priority, then target id
    pub rows: &'a [ResourceTargetRow],
    pub login_pages: &'a [LoginPage],
    /// Valid certificates; only consulted in managed-certificate mode
    pub certificates: &'a [CertificateRecord],
}

/// Knobs of the compiler
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Site kinds whose targets are routed
    pub site_types: Vec<SiteKind>,
    pub filter_namespace_domains: bool,
    pub generate_login_pages: bool,
    pub allow_undefined_local_sites: bool,
    /// Routes require a fetched certificate instead of naming a resolver
    pub managed_certificates: bool,
    pub proxy: ProxyConfig,
    pub server: ServerConfig,
    pub api_base_url: String,
}

impl CompileOptions {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        let site_types = config
            .proxy
            .site_types
            .iter()
            .filter_map(|s| match s.parse::<SiteKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    warn!(error = %e, "Ignoring configured site type");
                    None
                }
            })
            .collect();

        Self {
            site_types,
            filter_namespace_domains: config.flags.filter_namespace_domains,
            generate_login_pages: config.flags.generate_login_pages,
            allow_undefined_local_sites: config.flags.allow_undefined_local_sites,
            managed_certificates: config.certificates.managed,
            proxy: config.proxy.clone(),
            server: config.server.clone(),
            api_base_url: config.internal_api_base_url(),
        }
    }

    fn frontend_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.server.internal_hostname, self.server.next_port
        )
    }

    fn entry_point(&self, ssl: bool) -> String {
        if ssl {
            self.proxy.https_entrypoint.clone()
        } else {
            self.proxy.http_entrypoint.clone()
        }
    }

    fn auth_plugin(&self) -> AuthPlugin {
        AuthPlugin {
            api_base_url: self.api_base_url.clone(),
            user_session_cookie_name: self.server.session_cookie_name.clone(),
            access_token_query_param: self.server.resource_access_token_param.clone(),
            resource_session_request_param: self.server.resource_session_request_param.clone(),
        }
    }
}

/// Targets of one resource sharing a path and rewrite configuration
struct RouteGroup<'a> {
    key: String,
    name: String,
    resource: &'a Resource,
    domain: Option<&'a Domain>,
    /// First target of the group; carries the path config and priority
    route: &'a Target,
    backends: Vec<Backend<'a>>,
}

/// Compile the routing document for one exit node
pub fn compile(input: &CompileInput<'_>, options: &CompileOptions) -> ProxyDocument {
    let mut doc = ProxyDocument::default();
    doc.http.middlewares.insert(
        REDIRECT_HTTPS_MIDDLEWARE.to_string(),
        Middleware::redirect_scheme("https"),
    );
    doc.http.middlewares.insert(
        REDIRECT_ROOT_MIDDLEWARE.to_string(),
        Middleware::redirect_regex("^(https?)://([^/]+)(/.*)?", "${1}://${2}/auth/org", false),
    );
    doc.http.middlewares.insert(
        AUTH_MIDDLEWARE.to_string(),
        Middleware::plugin(AUTH_MIDDLEWARE, options.auth_plugin()),
    );

    for group in group_rows(input.rows, input.exit_node_id, options) {
        if group.resource.http {
            add_http_route(&mut doc, &group, input.certificates, options);
        } else {
            add_stream_route(&mut doc, &group, options);
        }
    }

    if options.generate_login_pages {
        add_login_pages(&mut doc, input.login_pages, input.certificates, options);
    }

    doc
}

fn admits(row: &ResourceTargetRow, exit_node_id: ExitNodeId, options: &CompileOptions) -> bool {
    if !row.target.enabled || !row.resource.enabled {
        return false;
    }
    if !options.site_types.contains(&row.site.kind) {
        return false;
    }
    if !row.resource.http && !options.proxy.allow_raw_resources {
        return false;
    }

    match row.site.exit_node_id {
        Some(id) => id == exit_node_id,
        None => row.site.kind == SiteKind::Local && options.allow_undefined_local_sites,
    }
}

fn group_rows<'a>(
    rows: &'a [ResourceTargetRow],
    exit_node_id: ExitNodeId,
    options: &CompileOptions,
) -> Vec<RouteGroup<'a>> {
    let mut groups: Vec<RouteGroup<'a>> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for row in rows.iter().filter(|row| admits(row, exit_node_id, options)) {
        let in_namespace = row
            .domain
            .as_ref()
            .map_or(false, |d| d.namespace_id.is_some());
        if options.filter_namespace_domains && in_namespace {
            continue;
        }

        let key = route_key(row.resource.resource_id, &row.target);
        let backend = Backend {
            target: &row.target,
            site: &row.site,
        };

        if let Some(&i) = by_key.get(&key) {
            groups[i].backends.push(backend);
            continue;
        }

        if let Err(e) = rewrite::validate(&row.target) {
            debug!(
                resource_id = %row.resource.resource_id,
                reason = %e,
                "Invalid path rewrite configuration"
            );
            continue;
        }

        by_key.insert(key.clone(), groups.len());
        groups.push(RouteGroup {
            key,
            name: sanitize(&row.resource.name),
            resource: &row.resource,
            domain: row.domain.as_ref(),
            route: &row.target,
            backends: vec![backend],
        });
    }

    groups
}

fn add_http_route(
    doc: &mut ProxyDocument,
    group: &RouteGroup<'_>,
    certificates: &[CertificateRecord],
    options: &CompileOptions,
) {
    let resource = group.resource;
    let full_domain = resource.full_domain.as_deref().filter(|d| !d.is_empty());
    let (Some(_), Some(full_domain)) = (resource.domain_id.as_ref(), full_domain) else {
        debug!(resource_id = %resource.resource_id, "HTTP resource has no domain");
        return;
    };

    // managed mode routes a domain only once a valid certificate exists,
    // whether or not the resource terminates TLS itself
    let managed = if options.managed_certificates {
        match tls::managed(full_domain, certificates) {
            Some(tls) => Some(tls),
            None => {
                debug!(domain = full_domain, "No valid certificate, route withheld");
                return;
            }
        }
    } else {
        None
    };

    let tls = match (resource.ssl, managed) {
        (false, _) => None,
        (true, Some(tls)) => Some(tls),
        (true, None) => Some(tls::self_resolved(
            resource,
            full_domain,
            group.domain,
            &options.proxy,
        )),
    };

    let router = router_name(&group.key, &group.name);
    let service = service_name(&group.key, &group.name);
    let host = host_rule(full_domain);
    let priority = router_priority(group.route);

    let maintenance = options.proxy.allow_maintenance_page && shows_maintenance(group);

    if resource.ssl {
        doc.http.routers.insert(
            format!("{}-redirect", router),
            HttpRouter {
                entry_points: vec![options.proxy.http_entrypoint.clone()],
                middlewares: vec![REDIRECT_HTTPS_MIDDLEWARE.to_string()],
                service: if maintenance {
                    maintenance_service_name(&group.key)
                } else {
                    service.clone()
                },
                rule: host.clone(),
                priority,
                tls: None,
            },
        );
    }

    if maintenance {
        add_maintenance_routes(doc, group, full_domain, &host, tls, options);
        return;
    }

    let mut middlewares = vec![AUTH_MIDDLEWARE.to_string()];
    middlewares.extend(options.proxy.additional_middlewares.iter().cloned());

    let route = group.route;
    if let (Some(rewrite_path), Some(path), Some(match_type), Some(rewrite_type)) = (
        route.rewrite_path.as_deref(),
        route.path.as_deref(),
        route.path_match_type,
        route.rewrite_path_type,
    ) {
        let name = rewrite_middleware_name(resource.resource_id, &group.key);
        let rw = rewrite::path_rewrite(&name, path, match_type, rewrite_path, rewrite_type);
        doc.http.middlewares.extend(rw.middlewares);
        middlewares.extend(rw.chain);
    }

    if let Some(headers) = request_headers(resource) {
        let name = headers_middleware_name(&group.key);
        doc.http
            .middlewares
            .insert(name.clone(), Middleware::request_headers(headers));
        middlewares.push(name);
    }

    doc.http.routers.insert(
        router,
        HttpRouter {
            entry_points: vec![options.entry_point(resource.ssl)],
            middlewares,
            service: service.clone(),
            rule: routing_rule(full_domain, route.path.as_deref(), route.path_match_type),
            priority,
            tls,
        },
    );

    let mut load_balancer = HttpLoadBalancer {
        servers: http_servers(&group.backends),
        sticky: resource.sticky_session.then(|| CookieSticky {
            cookie: StickyCookie {
                name: options.proxy.sticky_cookie_name.clone(),
                secure: resource.ssl,
                http_only: true,
            },
        }),
        ..HttpLoadBalancer::default()
    };

    if let Some(server_name) = resource.tls_server_name.as_deref().filter(|s| !s.is_empty()) {
        let transport = transport_name(&group.key);
        doc.http.servers_transports.insert(
            transport.clone(),
            ServersTransport {
                server_name: server_name.to_string(),
                insecure_skip_verify: true,
            },
        );
        load_balancer.servers_transport = Some(transport);
    }

    doc.http
        .services
        .insert(service, HttpService { load_balancer });
}

fn shows_maintenance(group: &RouteGroup<'_>) -> bool {
    let resource = group.resource;
    if !resource.maintenance_mode_enabled {
        return false;
    }

    match resource.maintenance_mode_type {
        Some(MaintenanceModeType::Forced) => true,
        Some(MaintenanceModeType::Automatic) => {
            let none_available = !group.backends.iter().any(Backend::is_available);
            if none_available {
                warn!(
                    resource = %resource.name,
                    "No healthy servers, showing maintenance page"
                );
            }
            none_available
        }
        None => false,
    }
}

fn maintenance_service_name(key: &str) -> String {
    format!("{}-maintenance-service", key)
}

/// Replace a resource's routes with the maintenance page and its assets
fn add_maintenance_routes(
    doc: &mut ProxyDocument,
    group: &RouteGroup<'_>,
    full_domain: &str,
    host: &str,
    tls: Option<RouterTls>,
    options: &CompileOptions,
) {
    let service = maintenance_service_name(&group.key);
    let router = format!("{}-maintenance-router", group.key);
    let rewrite = format!("{}-maintenance-rewrite", group.key);
    let entry_point = options.entry_point(group.resource.ssl);

    doc.http.services.insert(
        service.clone(),
        HttpService {
            load_balancer: HttpLoadBalancer {
                servers: vec![UrlServer {
                    url: options.frontend_url(),
                }],
                pass_host_header: Some(true),
                ..HttpLoadBalancer::default()
            },
        },
    );
    doc.http.middlewares.insert(
        rewrite.clone(),
        Middleware::replace_path_regex("^/(.*)", "/maintenance-screen"),
    );

    doc.http.routers.insert(
        format!("{}-assets", router),
        HttpRouter {
            entry_points: vec![entry_point.clone()],
            middlewares: Vec::new(),
            service: service.clone(),
            rule: format!(
                "Host(`{}`) && (PathPrefix(`/_next`) || PathRegexp(`^/__nextjs*`))",
                full_domain
            ),
            priority: MAINTENANCE_ASSETS_PRIORITY,
            tls: tls.clone(),
        },
    );
    doc.http.routers.insert(
        router,
        HttpRouter {
            entry_points: vec![entry_point],
            middlewares: vec![rewrite],
            service,
            rule: host.to_string(),
            priority: MAINTENANCE_PRIORITY,
            tls,
        },
    );
}

#[derive(Deserialize)]
struct HeaderEntry {
    name: String,
    value: String,
}

/// Custom request headers plus the `Host` override, if any are set
fn request_headers(resource: &Resource) -> Option<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();

    if let Some(raw) = resource.headers.as_deref().filter(|h| !h.is_empty()) {
        match serde_json::from_str::<Vec<HeaderEntry>>(raw) {
            Ok(entries) => headers.extend(entries.into_iter().map(|h| (h.name, h.value))),
            Err(e) => warn!(
                resource_id = %resource.resource_id,
                error = %e,
                "Failed to parse resource headers"
            ),
        }
    }

    if let Some(host) = resource.set_host_header.as_deref().filter(|h| !h.is_empty()) {
        headers.insert("Host".to_string(), host.to_string());
    }

    (!headers.is_empty()).then_some(headers)
}

fn add_stream_route(doc: &mut ProxyDocument, group: &RouteGroup<'_>, options: &CompileOptions) {
    let resource = group.resource;
    if !resource.enable_proxy {
        return;
    }
    let Some(port) = resource.proxy_port.filter(|p| *p != 0) else {
        debug!(resource_id = %resource.resource_id, "Raw resource has no proxy port");
        return;
    };

    let router = router_name(&group.key, &group.name);
    let service = service_name(&group.key, &group.name);
    let entry_points = vec![format!("{}-{}", resource.protocol.as_str(), port)];

    let mut load_balancer = StreamLoadBalancer {
        servers: stream_servers(&group.backends),
        servers_transport: None,
        sticky: resource.sticky_session.then(|| SourceIpSticky {
            ip_strategy: IpStrategy {
                depth: 0,
                source_port: true,
            },
        }),
    };

    match resource.protocol {
        TransportProtocol::Tcp => {
            if resource.proxy_protocol {
                let version = resource
                    .proxy_protocol_version
                    .filter(|v| *v != 0)
                    .unwrap_or(1);
                load_balancer.servers_transport = Some(format!(
                    "{}{}@file",
                    options.proxy.pp_transport_prefix, version
                ));
            }

            let tcp = doc.tcp.get_or_insert_with(Default::default);
            tcp.routers.insert(
                router,
                TcpRouter {
                    entry_points,
                    service: service.clone(),
                    rule: "HostSNI(`*`)".to_string(),
                },
            );
            tcp.services.insert(service, StreamService { load_balancer });
        }
        TransportProtocol::Udp => {
            let udp = doc.udp.get_or_insert_with(Default::default);
            udp.routers.insert(
                router,
                UdpRouter {
                    entry_points,
                    service: service.clone(),
                },
            );
            udp.services.insert(service, StreamService { load_balancer });
        }
    }
}

/// Three routers per login page: the auth allowlist, a catch-all redirect
/// to the org page, and HTTP to HTTPS
fn add_login_pages(
    doc: &mut ProxyDocument,
    pages: &[LoginPage],
    certificates: &[CertificateRecord],
    options: &CompileOptions,
) {
    if pages.is_empty() {
        return;
    }

    doc.http
        .services
        .entry(LANDING_SERVICE.to_string())
        .or_insert_with(|| HttpService {
            load_balancer: HttpLoadBalancer {
                servers: vec![UrlServer {
                    url: options.frontend_url(),
                }],
                ..HttpLoadBalancer::default()
            },
        });

    for page in pages {
        let full_domain = page.full_domain.as_deref().filter(|d| !d.is_empty());
        let (Some(_), Some(full_domain)) = (page.domain_id.as_ref(), full_domain) else {
            continue;
        };
        if options.managed_certificates && tls::managed(full_domain, certificates).is_none() {
            debug!(domain = full_domain, "No valid certificate for login page");
            continue;
        }

        let name = format!("loginpage-{}", page.login_page_id);
        let host = host_rule(full_domain);

        doc.http.routers.insert(
            format!("{}-router", name),
            HttpRouter {
                entry_points: vec![options.proxy.https_entrypoint.clone()],
                middlewares: Vec::new(),
                service: LANDING_SERVICE.to_string(),
                rule: format!(
                    "{} && (PathRegexp(`^/auth/resource/[^/]+$`) \
                     || PathRegexp(`^/auth/idp/[0-9]+/oidc/callback`) \
                     || PathPrefix(`/_next`) || Path(`/auth/org`) \
                     || PathRegexp(`^/__nextjs*`))",
                    host
                ),
                priority: 203,
                tls: Some(RouterTls::default()),
            },
        );
        doc.http.routers.insert(
            format!("{}-catchall", name),
            HttpRouter {
                entry_points: vec![options.proxy.https_entrypoint.clone()],
                middlewares: vec![REDIRECT_ROOT_MIDDLEWARE.to_string()],
                service: LANDING_SERVICE.to_string(),
                rule: host.clone(),
                priority: 202,
                tls: Some(RouterTls::default()),
            },
        );
        doc.http.routers.insert(
            format!("{}-redirect", name),
            HttpRouter {
                entry_points: vec![options.proxy.http_entrypoint.clone()],
                middlewares: vec![REDIRECT_HTTPS_MIDDLEWARE.to_string()],
                service: LANDING_SERVICE.to_string(),
                rule: host,
                priority: 201,
                tls: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wr_core::model::Site;
    use wr_core::types::{PathMatchType, RewritePathType};
    use wr_core::{DomainId, LoginPageId, OrgId, ResourceId, SiteId, TargetId};

    fn options() -> CompileOptions {
        CompileOptions::from_config(&CoordinatorConfig::default())
    }

    fn row(resource_id: u32, target_id: u32) -> ResourceTargetRow {
        ResourceTargetRow {
            resource: Resource {
                resource_id: ResourceId::new(resource_id),
                org_id: OrgId::new("org"),
                name: "App".into(),
                full_domain: Some("app.example.com".into()),
                subdomain: Some("app".into()),
                domain_id: Some(DomainId::new("d1")),
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
            },
            target: Target {
                target_id: TargetId::new(target_id),
                resource_id: ResourceId::new(resource_id),
                site_id: SiteId::new(1),
                ip: None,
                method: Some("http".into()),
                port: None,
                internal_port: Some(8080),
                enabled: true,
                health: None,
                path: None,
                path_match_type: None,
                rewrite_path: None,
                rewrite_path_type: None,
                priority: None,
            },
            site: Site {
                site_id: SiteId::new(1),
                org_id: OrgId::new("org"),
                name: "home".into(),
                kind: SiteKind::Newt,
                subnet: Some("10.0.0.0/24".into()),
                address: None,
                endpoint: None,
                public_key: None,
                listen_port: None,
                exit_node_id: Some(ExitNodeId::new(1)),
                online: true,
                last_hole_punch: None,
            },
            domain: None,
        }
    }

    fn compile_rows(rows: &[ResourceTargetRow], options: &CompileOptions) -> ProxyDocument {
        compile(
            &CompileInput {
                exit_node_id: ExitNodeId::new(1),
                rows,
                login_pages: &[],
                certificates: &[],
            },
            options,
        )
    }

    #[test]
    fn test_fixed_middlewares_always_present() {
        let doc = compile_rows(&[], &options());
        let mw = &doc.http.middlewares;
        assert!(mw.contains_key("redirect-to-https"));
        assert!(mw.contains_key("redirect-to-root"));
        let badger = &mw["badger"].plugin.as_ref().unwrap()["badger"];
        assert_eq!(badger.api_base_url, "http://pangolin:3001/api/v1");
        assert_eq!(badger.user_session_cookie_name, "p_session_token");
    }

    #[test]
    fn test_rows_for_other_exit_nodes_are_ignored() {
        let mut r = row(1, 1);
        r.site.exit_node_id = Some(ExitNodeId::new(2));
        assert!(compile_rows(&[r], &options()).http.routers.is_empty());
    }

    #[test]
    fn test_local_site_without_exit_node() {
        let mut r = row(1, 1);
        r.site.exit_node_id = None;
        r.site.kind = SiteKind::Local;
        r.target.ip = Some("127.0.0.1".into());
        r.target.port = Some(3000);
        assert_eq!(compile_rows(std::slice::from_ref(&r), &options()).http.routers.len(), 2);

        let mut opts = options();
        opts.allow_undefined_local_sites = false;
        assert!(compile_rows(&[r], &opts).http.routers.is_empty());
    }

    #[test]
    fn test_targets_with_distinct_paths_form_separate_routes() {
        let mut api = row(1, 1);
        api.target.path = Some("/api".into());
        api.target.path_match_type = Some(PathMatchType::Prefix);
        let root = row(1, 2);

        let doc = compile_rows(&[api, root], &options());
        assert!(doc.http.routers.contains_key("1-api-prefix-App-router"));
        assert!(doc.http.routers.contains_key("1-App-router"));
        assert_eq!(doc.http.routers["1-api-prefix-App-router"].priority, 113);
    }

    #[test]
    fn test_invalid_rewrite_config_is_dropped() {
        let mut r = row(1, 1);
        r.target.rewrite_path = Some("/v2".into());
        r.target.rewrite_path_type = Some(RewritePathType::Prefix);
        assert!(compile_rows(&[r], &options()).http.routers.is_empty());
    }

    #[test]
    fn test_rewrite_and_header_middlewares_chain_after_auth() {
        let mut r = row(1, 1);
        r.target.path = Some("/api".into());
        r.target.path_match_type = Some(PathMatchType::Prefix);
        r.target.rewrite_path = Some("/v2".into());
        r.target.rewrite_path_type = Some(RewritePathType::StripPrefix);
        r.resource.headers = Some(r#"[{"name":"X-Env","value":"prod"}]"#.into());
        r.resource.set_host_header = Some("internal.local".into());

        let doc = compile_rows(&[r], &options());
        let key = "1-api-prefix-v2-stripPrefix";
        let router = &doc.http.routers[&format!("{key}-App-router")];
        assert_eq!(
            router.middlewares,
            vec![
                "badger".to_string(),
                format!("rewrite-r1-{key}"),
                format!("addprefix-r1-{key}"),
                format!("{key}-headers-middleware"),
            ]
        );
        let headers = doc.http.middlewares[&format!("{key}-headers-middleware")]
            .headers
            .as_ref()
            .unwrap();
        assert_eq!(headers.custom_request_headers["X-Env"], "prod");
        assert_eq!(headers.custom_request_headers["Host"], "internal.local");
    }

    #[test]
    fn test_forced_maintenance_replaces_routes() {
        let mut r = row(1, 1);
        r.resource.maintenance_mode_enabled = true;
        r.resource.maintenance_mode_type = Some(MaintenanceModeType::Forced);

        let doc = compile_rows(&[r], &options());
        assert!(!doc.http.routers.contains_key("1-App-router"));
        assert!(!doc.http.services.contains_key("1-App-service"));
        assert_eq!(doc.http.routers["1-maintenance-router"].priority, 2000);
        assert_eq!(doc.http.routers["1-maintenance-router-assets"].priority, 2001);
        let lb = &doc.http.services["1-maintenance-service"].load_balancer;
        assert_eq!(lb.servers[0].url, "http://pangolin:3002");
        assert_eq!(lb.pass_host_header, Some(true));
        assert_eq!(
            doc.http.routers["1-App-router-redirect"].service,
            "1-maintenance-service"
        );
    }

    #[test]
    fn test_maintenance_page_can_be_disabled() {
        let mut r = row(1, 1);
        r.resource.maintenance_mode_enabled = true;
        r.resource.maintenance_mode_type = Some(MaintenanceModeType::Forced);
        let mut opts = options();
        opts.proxy.allow_maintenance_page = false;

        let doc = compile_rows(&[r], &opts);
        assert!(doc.http.routers.contains_key("1-App-router"));
        assert!(!doc.http.routers.contains_key("1-maintenance-router"));
    }

    #[test]
    fn test_managed_mode_withholds_route_without_certificate() {
        let mut opts = options();
        opts.managed_certificates = true;
        let doc = compile_rows(&[row(1, 1)], &opts);
        assert!(doc.http.routers.is_empty());
        assert!(doc.http.services.is_empty());

        let cert = CertificateRecord {
            domain: "app.example.com".into(),
            queried_domain: None,
            wildcard: false,
            cert_pem: String::new(),
            key_pem: String::new(),
            expires_at: None,
            updated_at: None,
        };
        let rows = [row(1, 1)];
        let doc = compile(
            &CompileInput {
                exit_node_id: ExitNodeId::new(1),
                rows: &rows,
                login_pages: &[],
                certificates: &[cert],
            },
            &opts,
        );
        assert_eq!(doc.http.routers["1-App-router"].tls, Some(RouterTls::default()));
    }

    #[test]
    fn test_managed_mode_gates_plain_http_resources() {
        let mut opts = options();
        opts.managed_certificates = true;
        let mut plain = row(1, 1);
        plain.resource.ssl = false;

        let doc = compile_rows(&[plain.clone()], &opts);
        assert!(doc.http.routers.is_empty());
        assert!(doc.http.services.is_empty());

        let cert = CertificateRecord {
            domain: "app.example.com".into(),
            queried_domain: None,
            wildcard: false,
            cert_pem: String::new(),
            key_pem: String::new(),
            expires_at: None,
            updated_at: None,
        };
        let rows = [plain];
        let doc = compile(
            &CompileInput {
                exit_node_id: ExitNodeId::new(1),
                rows: &rows,
                login_pages: &[],
                certificates: &[cert],
            },
            &opts,
        );
        let router = &doc.http.routers["1-App-router"];
        assert_eq!(router.entry_points, vec![opts.proxy.http_entrypoint.clone()]);
        assert_eq!(router.tls, None);
        assert!(!doc.http.routers.contains_key("1-App-router-redirect"));
    }

    #[test]
    fn test_tcp_resource_with_proxy_protocol() {
        let mut r = row(1, 1);
        r.resource.http = false;
        r.resource.proxy_port = Some(5432);
        r.resource.proxy_protocol = true;
        r.resource.proxy_protocol_version = Some(2);
        r.resource.sticky_session = true;

        let doc = compile_rows(&[r], &options());
        let tcp = doc.tcp.unwrap();
        let router = &tcp.routers["1-App-router"];
        assert_eq!(router.entry_points, vec!["tcp-5432"]);
        assert_eq!(router.rule, "HostSNI(`*`)");
        let lb = &tcp.services["1-App-service"].load_balancer;
        assert_eq!(lb.servers[0].address, "10.0.0.1:8080");
        assert_eq!(lb.servers_transport.as_deref(), Some("pp-transport-v2@file"));
        assert!(lb.sticky.is_some());
        assert!(doc.udp.is_none());
    }

    #[test]
    fn test_raw_resources_can_be_disallowed() {
        let mut r = row(1, 1);
        r.resource.http = false;
        r.resource.protocol = TransportProtocol::Udp;
        r.resource.proxy_port = Some(53);
        let mut opts = options();

        let doc = compile_rows(std::slice::from_ref(&r), &opts);
        assert_eq!(doc.udp.unwrap().routers["1-App-router"].entry_points, vec!["udp-53"]);

        opts.proxy.allow_raw_resources = false;
        assert!(compile_rows(&[r], &opts).udp.is_none());
    }

    #[test]
    fn test_namespace_domains_filtered_when_requested() {
        let mut r = row(1, 1);
        r.domain = Some(Domain {
            domain_id: DomainId::new("d1"),
            base_domain: "example.com".into(),
            cert_resolver: None,
            prefer_wildcard_cert: None,
            namespace_id: Some("ns".into()),
        });
        assert!(!compile_rows(std::slice::from_ref(&r), &options()).http.routers.is_empty());

        let mut opts = options();
        opts.filter_namespace_domains = true;
        assert!(compile_rows(&[r], &opts).http.routers.is_empty());
    }

    #[test]
    fn test_login_pages() {
        let mut opts = options();
        opts.generate_login_pages = true;
        let pages = [LoginPage {
            login_page_id: LoginPageId::new(4),
            exit_node_id: ExitNodeId::new(1),
            full_domain: Some("auth.example.com".into()),
            domain_id: Some(DomainId::new("d1")),
        }];
        let doc = compile(
            &CompileInput {
                exit_node_id: ExitNodeId::new(1),
                rows: &[],
                login_pages: &pages,
                certificates: &[],
            },
            &opts,
        );

        let routers = &doc.http.routers;
        assert_eq!(routers["loginpage-4-router"].priority, 203);
        assert_eq!(routers["loginpage-4-catchall"].middlewares, vec!["redirect-to-root"]);
        assert_eq!(routers["loginpage-4-redirect"].entry_points, vec!["web"]);
        assert!(doc.http.services.contains_key("landing-service"));
    }
}
