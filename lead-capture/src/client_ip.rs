use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName};

pub const UNKNOWN_CLIENT: &str = "unknown";

/// How much of the request's forwarding headers to believe.
#[derive(Debug, Clone)]
pub struct ClientIpPolicy {
    /// Header our edge network sets itself; clients cannot forge it.
    pub trusted_header: Option<HeaderName>,
    /// Whether a proxy we control sits in front and rewrites X-Forwarded-For.
    pub behind_trusted_proxy: bool,
}

impl ClientIpPolicy {
    pub fn new(trusted_header: &str, behind_trusted_proxy: bool) -> Self {
        Self {
            trusted_header: HeaderName::try_from(trusted_header.trim()).ok(),
            behind_trusted_proxy,
        }
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// Rate-limit key for a request.
///
/// Order: the trusted edge header, then X-Forwarded-For (first hop when a
/// trusted proxy fronts us, otherwise the last hop, the only one we saw
/// appended), then the socket peer, then `"unknown"`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, policy: &ClientIpPolicy) -> String {
    let trusted = policy
        .trusted_header
        .as_ref()
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(parse_ip);
    if let Some(ip) = trusted {
        return ip.to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|chain| {
            let mut hops = chain.split(',').map(str::trim).filter(|h| !h.is_empty());
            if policy.behind_trusted_proxy {
                hops.next()
            } else {
                hops.last()
            }
        })
        .and_then(parse_ip);
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
