//! SSRF (Server-Side Request Forgery) protection.
//!
//! Image URLs come from content editors, so the fetcher must not be usable
//! to reach loopback, private or otherwise internal addresses. Literal IP
//! hosts are checked before a request is made; hostnames are checked by
//! [`PublicResolver`], which reqwest consults for every connection,
//! redirects included.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use ipnet::{Ipv4Net, Ipv6Net};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

/// Error type for SSRF validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SsrfError {
    #[error("blocked IP: {0} (private/reserved)")]
    BlockedIp(IpAddr),

    #[error("DNS resolution failed: {0}")]
    DnsError(String),

    #[error("no public address for {0}")]
    NoPublicAddress(String),
}

const BLOCKED_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
];

const BLOCKED_V6: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::UNSPECIFIED, 128),
    (Ipv6Addr::LOCALHOST, 128),
    (Ipv6Addr::new(0x64, 0xff9b, 0, 0, 0, 0, 0, 0), 96),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

/// Check if an IP address is private, reserved, or otherwise blocked.
///
/// Covers loopback, RFC 1918, carrier-grade NAT, link-local, documentation
/// and benchmarking ranges, multicast, the reserved 240/4 block (including
/// broadcast), IPv6 unique local, and NAT64. IPv4-mapped IPv6 addresses are
/// judged by the IPv4 address they carry.
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            BLOCKED_V4.iter().filter_map(|(net, len)| Ipv4Net::new(*net, *len).ok()).any(|net| net.contains(&v4))
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_or_reserved(IpAddr::V4(v4)),
            None => {
                BLOCKED_V6.iter().filter_map(|(net, len)| Ipv6Net::new(*net, *len).ok()).any(|net| net.contains(&v6))
            }
        },
    }
}

/// Validate that an IP address is not private or reserved.
///
/// Returns an error if the IP is blocked.
pub fn validate_ip(ip: IpAddr) -> Result<(), SsrfError> {
    if is_private_or_reserved(ip) { Err(SsrfError::BlockedIp(ip)) } else { Ok(()) }
}

/// Keep only public addresses; fail if none remain.
pub fn public_addrs(host: &str, addrs: impl IntoIterator<Item = SocketAddr>) -> Result<Vec<SocketAddr>, SsrfError> {
    let mut public = Vec::new();
    for addr in addrs {
        match validate_ip(addr.ip()) {
            Ok(()) => public.push(addr),
            Err(e) => tracing::warn!(host, error = %e, "dropping blocked address"),
        }
    }
    if public.is_empty() { Err(SsrfError::NoPublicAddress(host.to_string())) } else { Ok(public) }
}

/// DNS resolver that never hands reqwest a private or reserved address.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let resolved = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| SsrfError::DnsError(format!("{host}: {e}")))?;
            let addrs: Addrs = Box::new(public_addrs(&host, resolved)?.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}
