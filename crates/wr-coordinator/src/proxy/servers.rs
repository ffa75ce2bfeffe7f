//! Load-balancer membership

use std::collections::HashSet;
use std::net::IpAddr;

use wr_core::model::{Site, Target};
use wr_core::types::SiteKind;

use super::document::{AddressServer, UrlServer};

/// A target paired with the site it runs on
#[derive(Debug, Clone, Copy)]
pub struct Backend<'a> {
    pub target: &'a Target,
    pub site: &'a Site,
}

impl Backend<'_> {
    /// Enabled, on an online site, and not failing health checks
    pub fn is_available(&self) -> bool {
        self.target.enabled && self.site.online && !self.target.is_unhealthy()
    }
}

/// Where the proxy reaches a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream<'a> {
    /// `local` and `wireguard` sites: the target's own address
    Direct { ip: &'a str, port: u16 },
    /// `newt` sites: first host of the site's tunnel subnet
    Tunnel { address: IpAddr, port: u16 },
}

impl<'a> Upstream<'a> {
    /// `None` when the fields this site kind needs are missing
    pub fn of(backend: &Backend<'a>) -> Option<Self> {
        let target = backend.target;
        match backend.site.kind {
            SiteKind::Local | SiteKind::Wireguard => Some(Upstream::Direct {
                ip: target.ip.as_deref().filter(|ip| !ip.is_empty())?,
                port: target.port.filter(|p| *p != 0)?,
            }),
            SiteKind::Newt => Some(Upstream::Tunnel {
                address: backend.site.tunnel_host()?,
                port: target.internal_port.filter(|p| *p != 0)?,
            }),
        }
    }

    pub fn address(&self) -> String {
        match self {
            Upstream::Direct { ip, port } => format!("{}:{}", ip, port),
            Upstream::Tunnel { address, port } => format!("{}:{}", address, port),
        }
    }
}

/// Backends eligible for a load balancer.
///
/// Offline sites are dropped only while at least one site is online, so a
/// resource never ends up with an empty server list just because every
/// site is briefly marked offline.
fn candidates<'a, 'b>(
    backends: &'b [Backend<'a>],
) -> impl Iterator<Item = &'b Backend<'a>> + 'b {
    let any_online = backends.iter().any(|b| b.site.online);
    backends
        .iter()
        .filter(|b| b.target.enabled)
        .filter(move |b| !any_online || b.site.online)
}

/// HTTP servers, `method://address`, deduplicated by URL
pub fn http_servers(backends: &[Backend<'_>]) -> Vec<UrlServer> {
    let mut seen = HashSet::new();
    candidates(backends)
        .filter(|b| !b.target.is_unhealthy())
        .filter_map(|b| {
            let method = b.target.method.as_deref().filter(|m| !m.is_empty())?;
            let upstream = Upstream::of(b)?;
            Some(format!("{}://{}", method, upstream.address()))
        })
        .filter(|url| seen.insert(url.clone()))
        .map(|url| UrlServer { url })
        .collect()
}

/// Raw TCP/UDP servers, `address:port`, deduplicated
pub fn stream_servers(backends: &[Backend<'_>]) -> Vec<AddressServer> {
    let mut seen = HashSet::new();
    candidates(backends)
        .filter_map(|b| Upstream::of(b).map(|u| u.address()))
        .filter(|address| seen.insert(address.clone()))
        .map(|address| AddressServer { address })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wr_core::types::HealthStatus;
    use wr_core::{OrgId, ResourceId, SiteId, TargetId};

    fn site(id: u32, kind: SiteKind, online: bool) -> Site {
        Site {
            site_id: SiteId::new(id),
            org_id: OrgId::new("org"),
            name: format!("site-{id}"),
            kind,
            subnet: Some("10.0.0.0/24".into()),
            address: None,
            endpoint: None,
            public_key: None,
            listen_port: None,
            exit_node_id: None,
            online,
            last_hole_punch: None,
        }
    }

    fn target(id: u32, site_id: u32) -> Target {
        Target {
            target_id: TargetId::new(id),
            resource_id: ResourceId::new(1),
            site_id: SiteId::new(site_id),
            ip: Some("192.168.1.10".into()),
            method: Some("http".into()),
            port: Some(80),
            internal_port: Some(8080),
            enabled: true,
            health: None,
            path: None,
            path_match_type: None,
            rewrite_path: None,
            rewrite_path_type: None,
            priority: None,
        }
    }

    #[test]
    fn test_url_synthesis_per_site_kind() {
        let newt = site(1, SiteKind::Newt, true);
        let wg = site(2, SiteKind::Wireguard, true);
        let (t1, t2) = (target(1, 1), target(2, 2));
        let backends = [
            Backend { target: &t1, site: &newt },
            Backend { target: &t2, site: &wg },
        ];

        let urls: Vec<_> = http_servers(&backends).into_iter().map(|s| s.url).collect();
        assert_eq!(urls, vec!["http://10.0.0.1:8080", "http://192.168.1.10:80"]);

        let addresses: Vec<_> = stream_servers(&backends)
            .into_iter()
            .map(|s| s.address)
            .collect();
        assert_eq!(addresses, vec!["10.0.0.1:8080", "192.168.1.10:80"]);
    }

    #[test]
    fn test_offline_sites_dropped_only_when_some_site_online() {
        let online = site(1, SiteKind::Local, true);
        let offline = site(2, SiteKind::Local, false);
        let t1 = target(1, 1);
        let mut t2 = target(2, 2);
        t2.ip = Some("192.168.1.11".into());

        let mixed = [
            Backend { target: &t1, site: &online },
            Backend { target: &t2, site: &offline },
        ];
        assert_eq!(http_servers(&mixed).len(), 1);

        let all_offline = [Backend { target: &t2, site: &offline }];
        assert_eq!(http_servers(&all_offline).len(), 1);
    }

    #[test]
    fn test_unhealthy_and_duplicate_targets_excluded() {
        let s = site(1, SiteKind::Newt, true);
        let t1 = target(1, 1);
        let t2 = target(2, 1);
        let mut t3 = target(3, 1);
        t3.internal_port = Some(9090);
        t3.health = Some(HealthStatus::Unhealthy);

        let backends = [
            Backend { target: &t1, site: &s },
            Backend { target: &t2, site: &s },
            Backend { target: &t3, site: &s },
        ];
        assert_eq!(http_servers(&backends).len(), 1);
        // raw services ignore health
        assert_eq!(stream_servers(&backends).len(), 2);
    }

    #[test]
    fn test_missing_fields_skip_target() {
        let s = site(1, SiteKind::Wireguard, true);
        let mut t = target(1, 1);
        t.method = None;
        assert!(http_servers(&[Backend { target: &t, site: &s }]).is_empty());
        assert_eq!(stream_servers(&[Backend { target: &t, site: &s }]).len(), 1);
    }
}
