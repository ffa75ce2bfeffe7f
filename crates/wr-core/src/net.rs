//! Tunnel address helpers

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use wr_protocol::SiteAlias;

use crate::model::{address_of, SiteResource};
use crate::types::SiteResourceMode;

/// Subnets a client should route into a site's tunnel.
///
/// `cidr` resources pass through when they parse as a network, `host`
/// resources become single-host routes. Order is kept, duplicates dropped.
pub fn remote_subnets(resources: &[SiteResource]) -> Vec<String> {
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter_map(|sr| match sr.mode {
            SiteResourceMode::Cidr => sr
                .destination
                .parse::<IpNet>()
                .ok()
                .map(|_| sr.destination.clone()),
            SiteResourceMode::Host => sr
                .destination
                .parse::<IpAddr>()
                .ok()
                .map(|_| format!("{}/32", sr.destination)),
            SiteResourceMode::Port => None,
        })
        .filter(|subnet| seen.insert(subnet.clone()))
        .collect()
}

/// DNS aliases of host-mode site resources
pub fn alias_config(resources: &[SiteResource]) -> Vec<SiteAlias> {
    resources
        .iter()
        .filter(|sr| sr.mode == SiteResourceMode::Host)
        .filter_map(|sr| match (&sr.alias, &sr.alias_address) {
            (Some(alias), Some(address)) if !alias.is_empty() && !address.is_empty() => {
                Some(SiteAlias {
                    alias: alias.clone(),
                    alias_address: address.clone(),
                })
            }
            _ => None,
        })
        .collect()
}

/// First usable host of `cidr`; a bare address is returned as is
pub fn first_host(cidr: &str) -> Option<IpAddr> {
    match cidr.parse::<IpNet>() {
        Ok(net) => net.hosts().next(),
        Err(_) => cidr.parse().ok(),
    }
}

/// Next free host address in `pool`, rendered with the pool's prefix.
///
/// The first host address is reserved for the gateway.
pub fn next_available_address<'a>(
    pool: &IpNet,
    taken: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let taken: HashSet<IpAddr> = taken
        .into_iter()
        .filter_map(|s| address_of(s).parse().ok())
        .collect();

    pool.hosts()
        .skip(1)
        .find(|addr| !taken.contains(addr))
        .map(|addr| format!("{}/{}", addr, pool.prefix_len()))
}
