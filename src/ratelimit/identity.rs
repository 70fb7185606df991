//! Client identity resolution.
//!
//! Turns a request's peer address, or a trusted forwarded-address header,
//! into the canonical key the rate limiter is indexed by.

use std::net::IpAddr;

/// Resolve the rate limiting key for a request.
///
/// `header` looks up the raw bytes of a request header by name. When
/// `trusted_header` is non-empty the left-most valid IP in that header's
/// comma-separated value is used, and a missing or invalid header fails
/// resolution instead of falling back to the peer address. Segments that are
/// not UTF-8 are skipped. Otherwise `remote_addr` (optionally with a port) is
/// used.
///
/// Returns `None` when no valid key can be derived.
pub fn resolve_client_key<'a, F>(
    header: F,
    remote_addr: &str,
    trusted_header: &str,
) -> Option<String>
where
    F: FnOnce(&str) -> Option<&'a [u8]>,
{
    if !trusted_header.is_empty() {
        return header(trusted_header)
            .filter(|value| !value.is_empty())
            .and_then(first_valid_forwarded);
    }

    canonical_ip(strip_port(remote_addr.trim()))
}

/// Resolve the key from an HTTP header map.
pub fn resolve_from_headers(
    headers: &axum::http::HeaderMap,
    remote_addr: &str,
    trusted_header: &str,
) -> Option<String> {
    resolve_client_key(
        |name| headers.get(name).map(|v| v.as_bytes()),
        remote_addr,
        trusted_header,
    )
}

/// Left-most valid address in a forwarded-address chain.
fn first_valid_forwarded(value: &[u8]) -> Option<String> {
    value
        .split(|&b| b == b',')
        .filter_map(|part| std::str::from_utf8(part).ok())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .find_map(|part| canonical_ip(strip_port(part)))
}

/// Remove a trailing `:port`, handling the bracketed IPv6 `[addr]:port` form.
///
/// Input that is not a host/port pair, such as a bare IPv6 literal, is
/// returned unchanged.
pub fn strip_port(hostport: &str) -> &str {
    if let Some(rest) = hostport.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) if tail.starts_with(':') && !tail[1..].contains(':') => host,
            _ => hostport,
        };
    }

    match hostport.split_once(':') {
        Some((host, port)) if !port.contains(':') && !host.is_empty() => host,
        _ => hostport,
    }
}

/// Validate an IP literal and return its canonical text form.
///
/// Surrounding whitespace is trimmed. Embedded whitespace, control characters,
/// and commas are rejected. Enclosing brackets and a `%zone` suffix are
/// removed before parsing.
pub fn canonical_ip(candidate: &str) -> Option<String> {
    let mut s = candidate.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().any(|b| b.is_ascii_control() || b == b' ' || b == b',') {
        return None;
    }

    if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        s = inner;
    }

    if let Some((addr, _zone)) = s.split_once('%') {
        s = addr;
    }

    s.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}
