// SPDX-License-Identifier: Apache-2.0
use actix_web::http::header::HeaderMap;
use std::net::SocketAddr;

/// Proxy headers consulted for the client address, highest priority first.
pub const CLIENT_IP_HEADERS: &[&str] = &[
    "CF-Connecting-IP",    // Cloudflare
    "True-Client-IP",      // Akamai
    "X-Real-IP",           // nginx and friends
    "X-Forwarded-For",     // de facto standard
    "X-Cluster-Client-IP", // Rackspace, Riverbed
    "Fastly-Client-IP",    // Fastly
    "Forwarded",           // RFC 7239
];

/// Resolve the address a session is bound to.
///
/// The first listed header with a non-empty value wins; for list-valued
/// headers only the first element is used. Without any header the transport
/// peer address (port removed) is returned. Values are not validated and the
/// headers are trusted as-is, so the gate must sit behind an edge that sets
/// or strips them.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .find(|value| !value.is_empty())
        .map(|value| first_list_element(&String::from_utf8_lossy(value.as_bytes())).to_string())
        .unwrap_or_else(|| peer.map(|addr| addr.ip().to_string()).unwrap_or_default())
}

fn first_list_element(value: &str) -> &str {
    value.split(',').next().unwrap_or(value).trim()
}
