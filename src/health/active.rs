//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every upstream instance
//! - Update instance health state from probe results

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::BackendManager;
use crate::observability::metrics;

pub struct HealthMonitor {
    backends: Arc<ArcSwap<BackendManager>>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(backends: Arc<ArcSwap<BackendManager>>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            backends,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance once.
    pub async fn check_all(&self) {
        let manager = self.backends.load_full();
        for backend in manager.all_backends() {
            let healthy = self.probe(&backend).await;
            if healthy {
                backend.mark_success(self.config.healthy_threshold as usize);
            } else {
                backend.mark_failure(self.config.unhealthy_threshold as usize);
            }
            metrics::record_backend_health(&backend.name, backend.is_healthy());
        }
    }

    async fn probe(&self, backend: &Backend) -> bool {
        let addr = backend.addr;
        let request = match Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", addr, self.config.path))
            .header(header::USER_AGENT, "edge-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(addr = %addr, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %addr, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(addr = %addr, "Health check failed: timeout");
                false
            }
        }
    }
}
