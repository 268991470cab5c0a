//! Header manipulation for forwarded traffic.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Add the gateway's diagnostic headers
//!
//! # Design Decisions
//! - Headers named in `Connection` are treated as hop-by-hop too
//! - `Host` is rewritten to the selected instance by the forwarder

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::time::{SystemTime, UNIX_EPOCH};

pub const X_GATEWAY_TIMESTAMP: &str = "x-gateway-timestamp";
pub const X_GATEWAY_PROCESSED: &str = "x-gateway-processed";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Stamp the outbound request with the gateway's processing-start time.
pub fn add_gateway_timestamp(headers: &mut HeaderMap) {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    headers.insert(HeaderName::from_static(X_GATEWAY_TIMESTAMP), HeaderValue::from(millis as u64));
}

/// Mark a response as having passed through the gateway.
pub fn mark_processed(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static(X_GATEWAY_PROCESSED),
        HeaderValue::from_static("true"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_standard_and_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("secret"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("x-correlation-id", HeaderValue::from_static("cid"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-private").is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.get("x-correlation-id").unwrap(), "cid");
    }

    #[test]
    fn timestamp_is_epoch_millis() {
        let mut headers = HeaderMap::new();
        add_gateway_timestamp(&mut headers);
        let value: u64 = headers
            .get(X_GATEWAY_TIMESTAMP)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(value > 1_600_000_000_000);
    }
}
