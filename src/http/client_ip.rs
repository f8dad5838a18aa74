//! Client IP resolution behind proxies.
//!
//! Priority order: `CF-Connecting-IP`, `X-Real-IP`, first entry of
//! `X-Forwarded-For`, then the remote socket address. Any `:port`
//! suffix is stripped from the final value.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Resolves the client IP for a request.
#[must_use]
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(ip) = header("cf-connecting-ip") {
        return strip_port(&ip);
    }

    if let Some(ip) = header("x-real-ip") {
        return strip_port(&ip);
    }

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded
            .split(',')
            .map(str::trim)
            .find(|value| !value.is_empty())
        {
            return strip_port(first);
        }
    }

    socket.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// Removes a trailing `:port` from an address string.
///
/// Handles bracketed IPv6 (`[::1]:80` → `::1`) and leaves bare IPv6
/// addresses untouched.
fn strip_port(value: &str) -> String {
    if let Some(stripped) = value.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            return stripped[..end].to_string();
        }
        return value.to_string();
    }

    // More than one colon means a bare IPv6 address, not host:port.
    if value.matches(':').count() == 1 {
        if let Some((host, _port)) = value.rsplit_once(':') {
            return host.to_string();
        }
    }

    value.to_string()
}
