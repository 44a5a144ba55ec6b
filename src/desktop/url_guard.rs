// src/desktop/url_guard.rs
// Download target validation

use super::BridgeError;
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parse `raw` and refuse anything that is not http(s) or that names a
/// private network address directly. Host names are checked at connect
/// time by the download client's resolver. Loopback stays reachable for a
/// locally hosted API.
pub fn validate_download_url(raw: &str) -> Result<Url, BridgeError> {
    let url = Url::parse(raw.trim()).map_err(|e| BridgeError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(BridgeError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("scheme '{}' is not allowed", url.scheme()),
        });
    }

    let host = url.host_str().ok_or_else(|| BridgeError::InvalidUrl {
        url: raw.to_string(),
        reason: "missing host".to_string(),
    })?;

    if literal_ip(host).map(is_blocked).unwrap_or(false) {
        return Err(BridgeError::BlockedHost(host.to_string()));
    }

    Ok(url)
}

/// IP literal in a URL host, with IPv6 brackets removed
pub(crate) fn literal_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

pub fn is_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_blocked_v4(v4),
            None => is_blocked_v6(v6),
        },
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        // carrier-grade NAT, 100.64.0.0/10
        || (a == 100 && (64..=127).contains(&b))
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_unspecified()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
}
