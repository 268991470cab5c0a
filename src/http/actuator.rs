//! Gateway-served operational endpoints (`/actuator/health`, `/actuator/info`).

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub components: BTreeMap<String, ServiceHealth>,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    pub instances: Vec<InstanceHealth>,
}

#[derive(Debug, Serialize)]
pub struct InstanceHealth {
    pub name: String,
    pub address: String,
    pub status: &'static str,
    pub active_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct GatewayInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub routes: Vec<RouteInfo>,
    pub rate_limit_buckets: usize,
}

#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub id: String,
    pub path: String,
    pub upstream: String,
    pub strip_prefix: usize,
    pub rate_limited: bool,
}

/// The gateway itself is always UP while serving; upstream state is
/// reported per service for operators.
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let backends = state.backends.load();
    let components = backends
        .services()
        .map(|service| {
            let instances: Vec<InstanceHealth> = backends
                .instances(service)
                .iter()
                .map(|b| InstanceHealth {
                    name: b.name.clone(),
                    address: b.addr.to_string(),
                    status: b.health_state().as_str(),
                    active_connections: b.active_connections(),
                })
                .collect();
            let up = backends.instances(service).iter().any(|b| b.is_healthy());
            (
                service.to_string(),
                ServiceHealth {
                    status: if up { "UP" } else { "DOWN" },
                    instances,
                },
            )
        })
        .collect();

    Json(HealthReport {
        status: "UP",
        components,
    })
}

pub async fn info(State(state): State<AppState>) -> Json<GatewayInfo> {
    let runtime = state.runtime.load();
    let routes = runtime
        .router
        .routes()
        .iter()
        .map(|r| RouteInfo {
            id: r.id.clone(),
            path: r.pattern.to_string(),
            upstream: r.upstream.clone(),
            strip_prefix: r.strip_prefix,
            rate_limited: r.rate_limited,
        })
        .collect();

    Json(GatewayInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        routes,
        rate_limit_buckets: state.limiter.tracked_buckets(),
    })
}
