//! Request-path error type.
//!
//! Every pipeline stage reports failure as a [`GatewayError`]; the
//! dispatcher renders it as a JSON body carrying the correlation ID.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthFailure;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication required")]
    Unauthenticated,
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    #[error("insufficient authority")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error("no route for path")]
    NoRoute,
    #[error("request path contains dot segments or encoded separators")]
    InvalidPath,
    #[error("no healthy instance of '{0}'")]
    NoHealthyUpstream(String),
    #[error("upstream '{upstream}' unavailable: {reason}")]
    UpstreamUnavailable { upstream: String, reason: String },
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated | GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NoRoute => StatusCode::NOT_FOUND,
            GatewayError::InvalidPath => StatusCode::BAD_REQUEST,
            GatewayError::NoHealthyUpstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "unauthenticated",
            GatewayError::Auth(_) => "invalid_token",
            GatewayError::Forbidden => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::NoRoute => "not_found",
            GatewayError::InvalidPath => "bad_request",
            GatewayError::NoHealthyUpstream(_) => "service_unavailable",
            GatewayError::UpstreamUnavailable { .. } => "bad_gateway",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Render with the request's correlation ID in the body.
    pub fn into_response_for(self, correlation_id: Option<&str>) -> Response {
        let status = self.status();
        // Upstream details stay in the logs.
        let message = match &self {
            GatewayError::UpstreamUnavailable { upstream, .. } => {
                format!("upstream '{}' unavailable", upstream)
            }
            GatewayError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.code(),
            message,
            correlation_id,
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        match &self {
            GatewayError::Unauthenticated => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            GatewayError::Auth(_) => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Bearer error="invalid_token""#),
                );
            }
            GatewayError::RateLimited { retry_after } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
            }
            _ => {}
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.into_response_for(None)
    }
}

/// Whole seconds, rounded up, at least 1.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after
        .as_secs()
        .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn statuses() {
        assert_eq!(GatewayError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::Auth(AuthFailure::Expired).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::NoRoute.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::NoHealthyUpstream("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(100)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = GatewayError::RateLimited {
            retry_after: Duration::from_millis(250),
        }
        .into_response_for(Some("cid-1"));

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
        let body = body_json(response).await;
        assert_eq!(body["error"], "rate_limited");
        assert_eq!(body["correlation_id"], "cid-1");
    }

    #[tokio::test]
    async fn invalid_token_challenge() {
        let response = GatewayError::Auth(AuthFailure::BadSignature).into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer error="invalid_token""#
        );
        let body = body_json(response).await;
        assert_eq!(body["message"], "token signature is invalid");
        assert!(body.get("correlation_id").is_none());
    }

    #[tokio::test]
    async fn upstream_details_not_leaked() {
        let response = GatewayError::UpstreamUnavailable {
            upstream: "user-service".into(),
            reason: "connection refused (os error 111) to 10.0.0.7".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["message"], "upstream 'user-service' unavailable");
    }
}
