//! DNS resolution for candidates.
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::ResolveError,
    TokioAsyncResolver,
};
use log::debug;
use tokio::{fs, io};

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => parse_resolver_list(r),
            };
            debug!("Using resolvers {resolver_ips:?}");
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("No usable system resolver config ({e}), falling back to Cloudflare");
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Looks `host` up and returns the first address of the answer.
///
/// `Ok(None)` means the lookup succeeded but carried no address records.
pub async fn resolve_first(
    resolver: &TokioAsyncResolver,
    host: &str,
) -> Result<Option<IpAddr>, ResolveError> {
    let lookup = resolver.lookup_ip(host).await?;
    Ok(lookup.iter().next())
}

fn parse_resolver_list(list: &str) -> Vec<IpAddr> {
    list.split(',')
        .filter_map(|r| IpAddr::from_str(r.trim()).ok())
        .collect()
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
