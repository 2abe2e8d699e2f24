//! Client address extraction.

use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;

use crate::forward::FORWARDED_FOR;

pub const REAL_IP: &str = "X-Real-Ip";

/// Picks the address string to trust: `X-Forwarded-For`, then `X-Real-Ip`,
/// then the connection address. The first non-empty source wins, even if it
/// later fails to parse.
pub fn candidate(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    let from_header = |name: &str| {
        headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = from_header(FORWARDED_FOR) {
        // left-most entry is the originating client
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        return Some(first.to_string());
    }
    if let Some(real_ip) = from_header(REAL_IP) {
        return Some(real_ip);
    }
    remote.map(|addr| addr.to_string())
}

/// Parses a bare IP or an `ip:port` / `[ipv6]:port` pair.
pub fn parse_ip(candidate: &str) -> Option<IpAddr> {
    candidate
        .parse::<IpAddr>()
        .ok()
        .or_else(|| candidate.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
