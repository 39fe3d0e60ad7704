use log::{debug, info};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addresses owned by the node itself, used to attribute host
/// connections. Interfaces matching one of `skip` (exact name, or a
/// prefix when the entry ends in `*`) are ignored, as are loopback
/// and link local addresses
pub fn node_ips(skip: &[String]) -> HashSet<IpAddr> {
    let mut ips = HashSet::new();

    for interface in default_net::get_interfaces() {
        if is_skipped(&interface.name, skip) {
            debug!("Skipping interface {}", interface.name);
            continue;
        }

        let addrs = interface
            .ipv4
            .iter()
            .map(|net| IpAddr::V4(net.addr))
            .chain(interface.ipv6.iter().map(|net| IpAddr::V6(net.addr)));

        for ip in addrs.filter(|ip| is_node_addr(*ip)) {
            debug!("Found node address {} on {}", ip, interface.name);
            ips.insert(ip);
        }
    }

    info!("Discovered {} node addresses", ips.len());
    ips
}

fn is_skipped(name: &str, skip: &[String]) -> bool {
    skip.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    })
}

fn is_node_addr(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 != Ipv4Addr::LOCALHOST && !v4.is_link_local(),
        IpAddr::V6(v6) => v6 != Ipv6Addr::LOCALHOST,
    }
}
