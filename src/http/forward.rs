//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rebuild the request for the selected instance (stripped path + query)
//! - Strip hop-by-hop headers, add correlation and timestamp headers
//! - Bound the upstream call with a timeout
//! - Feed passive health checking from the outcome
//!
//! # Design Decisions
//! - Bodies stream through; nothing is buffered
//! - No retries: a failed call surfaces as 502
//! - Dropping the returned future abandons the upstream call

use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, StatusCode, Uri, Version};
use axum::response::Response;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::{HealthCheckConfig, TimeoutConfig};
use crate::error::GatewayError;
use crate::load_balancer::BackendConnectionGuard;
use crate::observability::X_CORRELATION_ID;
use crate::security::headers::{add_gateway_timestamp, mark_processed, strip_hop_by_hop};

/// Sends requests to upstream instances.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    upstream_timeout: Duration,
    healthy_threshold: usize,
    unhealthy_threshold: usize,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig, health: &HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            upstream_timeout: Duration::from_secs(timeouts.upstream_secs),
            healthy_threshold: health.healthy_threshold as usize,
            unhealthy_threshold: health.unhealthy_threshold as usize,
        }
    }

    /// Forward `request` to the reserved instance at `path_and_query`.
    pub async fn forward(
        &self,
        instance: BackendConnectionGuard,
        service: &str,
        request: Request<Body>,
        path_and_query: &str,
        correlation_id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let (mut parts, body) = request.into_parts();

        parts.uri = upstream_uri(&instance, path_and_query)
            .map_err(|e| GatewayError::Internal(format!("cannot build upstream URI: {}", e)))?;
        parts.version = Version::HTTP_11;

        strip_hop_by_hop(&mut parts.headers);
        if let Ok(host) = HeaderValue::from_str(&instance.addr.to_string()) {
            parts.headers.insert(header::HOST, host);
        }
        if let Some(value) = correlation_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            parts.headers.insert(X_CORRELATION_ID, value);
        }
        add_gateway_timestamp(&mut parts.headers);

        tracing::debug!(
            service = %service,
            instance = %instance.name,
            uri = %parts.uri,
            "Forwarding request"
        );

        let outbound = Request::from_parts(parts, body);
        let unavailable = |reason: String| GatewayError::UpstreamUnavailable {
            upstream: service.to_string(),
            reason,
        };

        match tokio::time::timeout(self.upstream_timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if matches!(
                    status,
                    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
                ) {
                    instance.mark_failure(self.unhealthy_threshold);
                } else {
                    instance.mark_success(self.healthy_threshold);
                }

                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                mark_processed(&mut parts.headers);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Ok(Err(e)) => {
                instance.mark_failure(self.unhealthy_threshold);
                tracing::error!(service = %service, instance = %instance.name, error = %e, "Upstream request failed");
                Err(unavailable(e.to_string()))
            }
            Err(_) => {
                instance.mark_failure(self.unhealthy_threshold);
                tracing::error!(
                    service = %service,
                    instance = %instance.name,
                    timeout = ?self.upstream_timeout,
                    "Upstream request timed out"
                );
                Err(unavailable(format!("timed out after {:?}", self.upstream_timeout)))
            }
        }
    }
}

fn upstream_uri(instance: &BackendConnectionGuard, path_and_query: &str) -> Result<Uri, axum::http::Error> {
    let authority = Authority::try_from(instance.addr.to_string())?;
    let path = PathAndQuery::try_from(path_and_query)?;
    Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority)
        .path_and_query(path)
        .build()
}
