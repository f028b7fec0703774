use std::net::IpAddr;

use crate::message::Request;

/// Best-effort client IP for handlers: the last parseable entry of
/// `X-Forwarded-For`, then `X-Real-IP`, then the socket peer address. Returns
/// `None` when the request carries no usable peer address at all.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let remote = remote_ip(request)?;

    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = request.header(header_name) {
            if let Some(ip) = parse_ip_header(value) {
                return Some(ip);
            }
        }
    }

    Some(remote)
}

pub fn remote_ip(request: &Request) -> Option<IpAddr> {
    request.remote_addr.map(|addr| addr.ip())
}

fn parse_ip_header(value: &str) -> Option<IpAddr> {
    value
        .split(',')
        .rev()
        .find_map(|entry| entry.trim().parse().ok())
}
