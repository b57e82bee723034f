//! Client IP resolution (§4.K): `X-Forwarded-For` (first valid entry), then
//! `X-Real-IP`, then `CF-Connecting-IP`, then the direct peer address.
//! Mirrors the teacher's `request_throttle::resolve_client_ip` /
//! `extract_forwarded_ip`, minus the `behind_proxy` toggle — this gateway has
//! no config flag to gate on, so it always prefers a forwarded header when
//! one is present and falls back to the socket's peer address otherwise.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

#[must_use]
pub fn resolve_client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    extract_forwarded_ip(headers).unwrap_or_else(|| peer.ip())
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    if let Some(xff) = xff
        && let Some(ip) = xff.split(',').find_map(|candidate| parse_ip(candidate.trim()))
    {
        return Some(ip);
    }

    let xri = headers.get("x-real-ip").and_then(|v| v.to_str().ok());
    if let Some(xri) = xri
        && let Some(ip) = parse_ip(xri.trim())
    {
        return Some(ip);
    }

    let cf_ip = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok());
    if let Some(cf_ip) = cf_ip
        && let Some(ip) = parse_ip(cf_ip.trim())
    {
        return Some(ip);
    }

    None
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    if value.is_empty() {
        return None;
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_ip_uses_first_xff_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            axum::http::HeaderValue::from_static("203.0.113.1, 198.51.100.9"),
        );
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            resolve_client_ip(&headers, peer),
            IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 1))
        );
    }

    #[test]
    fn falls_back_to_x_real_ip_then_cf_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", axum::http::HeaderValue::from_static("198.51.100.7"));
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            resolve_client_ip(&headers, peer),
            IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 7))
        );
    }

    #[test]
    fn falls_back_to_peer_address_with_no_headers() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "203.0.113.5:9000".parse().unwrap();
        assert_eq!(resolve_client_ip(&headers, peer), peer.ip());
    }
}
