//! Correlation ID propagation.
//!
//! # Responsibilities
//! - Reuse a caller-supplied `X-Correlation-ID` or mint a new one
//! - Make the ID visible to handlers, the forwarder and every log line
//! - Echo the ID on the response
//!
//! # Design Decisions
//! - IDs are reused verbatim when they are 1..=128 visible ASCII bytes;
//!   anything else is replaced to keep control characters out of logs
//! - The rest of the chain runs inside a span carrying `correlation_id`,
//!   which closes on completion, error or drop
//! - Inner spans (the access-log span of `TraceLayer`) record the ID as
//!   well, so formatters that print only the current span still show it

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, Span};
use uuid::Uuid;

pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

const MAX_LEN: usize = 128;

/// Correlation ID of the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_acceptable(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_LEN && id.bytes().all(|b| b.is_ascii_graphic())
}

/// Return the inbound correlation ID if acceptable, otherwise a new UUID v4.
pub fn ensure_correlation_id(headers: &HeaderMap) -> String {
    match headers.get(&X_CORRELATION_ID).and_then(|v| v.to_str().ok()) {
        Some(id) if is_acceptable(id) => id.to_string(),
        Some(rejected) => {
            let id = Uuid::new_v4().to_string();
            tracing::debug!(
                rejected_len = rejected.len(),
                correlation_id = %id,
                "Replacing unacceptable correlation ID"
            );
            id
        }
        None => Uuid::new_v4().to_string(),
    }
}

/// Outermost pipeline stage.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let id = ensure_correlation_id(request.headers());
    let header = HeaderValue::from_str(&id).ok();

    if let Some(value) = &header {
        request.headers_mut().insert(X_CORRELATION_ID, value.clone());
    }
    request.extensions_mut().insert(CorrelationId(id.clone()));

    let span = tracing::info_span!(
        "request",
        correlation_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}

/// Span for `TraceLayer::make_span_with`, tagged with the ID stored by
/// [`correlation_middleware`].
pub fn access_log_span(request: &Request) -> Span {
    let id = request
        .extensions()
        .get::<CorrelationId>()
        .map(CorrelationId::as_str)
        .unwrap_or_default();
    tracing::info_span!(
        "access",
        correlation_id = %id,
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
    )
}
