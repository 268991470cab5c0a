//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with the gateway endpoints and middleware
//! - Run the ordered request pipeline for every proxied request
//! - Own the background tasks (health monitor, key refresh, bucket
//!   sweeper, config updates) and stop them on shutdown
//!
//! # Data Flow
//! ```text
//! correlation_middleware
//!   → unsafe-segment check         (400)
//!   → is_public?                   (skip authentication)
//!   → bearer token → authenticate  (401)
//!   → resolve_key
//!   → match_route                  (404)
//!   → try_acquire if rate_limited  (429)
//!   → authorize                    (401 / 403)
//!   → select instance              (503)
//!   → forward                      (502)
//!   → rate-limit headers, X-Gateway-Processed, X-Correlation-ID
//! ```
//!
//! # Design Decisions
//! - Routes and policy live in one `ArcSwap` snapshot so a reload never
//!   mixes tables from two configurations within a request
//! - Each stage is a plain function call returning an outcome; the
//!   dispatcher is the only place that turns outcomes into responses

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::keys::{
    run_key_refresh, JwksClient, KeyFetchError, KeyRefresher, KeySet, KeyStore,
};
use crate::auth::{bearer_token, resolve_key, AuthSetupError, TokenAuthenticator};
use crate::config::{CorsConfig, GatewayConfig};
use crate::error::GatewayError;
use crate::health::HealthMonitor;
use crate::http::actuator;
use crate::http::forward::Forwarder;
use crate::lifecycle::Shutdown;
use crate::load_balancer::BackendManager;
use crate::observability::{
    access_log_span, correlation_middleware, metrics, CorrelationId, X_CORRELATION_ID,
};
use crate::policy::{AuthorizationPolicy, Decision, DenyReason, PolicyError};
use crate::routing::matcher::{has_unsafe_segments, PatternError};
use crate::routing::router::{strip_prefix_segments, RequestRouter};
use crate::security::rate_limit::{Acquire, BucketLimits, BucketStore, RateLimiter};

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_BURST_CAPACITY: HeaderName =
    HeaderName::from_static("x-ratelimit-burst-capacity");
pub const X_RATELIMIT_REPLENISH_RATE: HeaderName =
    HeaderName::from_static("x-ratelimit-replenish-rate");

/// Error building the server from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("route table: {0}")]
    Routes(#[from] PatternError),
    #[error("authorization policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("authenticator: {0}")]
    Auth(#[from] AuthSetupError),
    #[error("signing keys: {0}")]
    Keys(#[from] KeyFetchError),
    #[error("CORS: {0}")]
    Cors(String),
}

/// Compiled, hot-reloadable request tables.
#[derive(Debug)]
pub struct Runtime {
    pub router: RequestRouter,
    pub policy: AuthorizationPolicy,
}

impl Runtime {
    pub fn compile(config: &GatewayConfig) -> Result<Self, ServerError> {
        Ok(Self {
            router: RequestRouter::from_config(&config.routes, &config.rate_limit)?,
            policy: AuthorizationPolicy::from_config(&config.auth)?,
        })
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ArcSwap<Runtime>>,
    pub backends: Arc<ArcSwap<BackendManager>>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub limiter: RateLimiter,
    pub forwarder: Forwarder,
}

/// The gateway server.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: GatewayConfig,
    keys: Arc<KeyStore>,
    jwks: Option<JwksClient>,
}

impl HttpServer {
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let runtime = Arc::new(ArcSwap::from_pointee(Runtime::compile(&config)?));
        let backends = Arc::new(ArcSwap::from_pointee(BackendManager::new(&config.backends)));

        let (keys, jwks) = match &config.auth.hmac_secret {
            Some(secret) => (KeyStore::new(KeySet::from_secret(secret.as_bytes())), None),
            None => {
                let client = JwksClient::new(
                    &config.auth.issuer,
                    config.auth.jwks_uri.as_deref(),
                    Duration::from_secs(config.auth.jwks_timeout_secs),
                )?;
                (KeyStore::default(), Some(client))
            }
        };
        let keys = Arc::new(keys);
        let mut authenticator = TokenAuthenticator::new(&config.auth, keys.clone())?;
        if let Some(client) = &jwks {
            let refresher = KeyRefresher::new(
                client.clone(),
                keys.clone(),
                Duration::from_secs(config.auth.jwks_min_refetch_secs),
            );
            authenticator = authenticator.with_refresher(Arc::new(refresher));
        }
        let authenticator = Arc::new(authenticator);

        let limiter = RateLimiter::new(Arc::new(BucketStore::new()), &config.rate_limit);
        let forwarder = Forwarder::new(&config.timeouts, &config.health_check);

        let state = AppState {
            runtime,
            backends,
            authenticator,
            limiter,
            forwarder,
        };
        let router = Self::build_router(&config, state.clone())?;

        Ok(Self {
            router,
            state,
            config,
            keys,
            jwks,
        })
    }

    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Result<Router, ServerError> {
        let mut router = Router::new()
            .route("/actuator/health", get(actuator::health))
            .route("/actuator/info", get(actuator::info))
            .fallback(gateway_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes));

        if config.cors.enabled {
            router = router.layer(cors_layer(&config.cors)?);
        }

        Ok(router
            .layer(TraceLayer::new_for_http().make_span_with(access_log_span))
            .layer(axum::middleware::from_fn(correlation_middleware)))
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` is triggered.
    ///
    /// Validated configurations arriving on `updates` replace the route
    /// table, policy and instance pools.
    pub async fn run(
        self,
        listener: TcpListener,
        updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let monitor = HealthMonitor::new(self.state.backends.clone(), self.config.health_check.clone());
        tokio::spawn(monitor.run(shutdown.subscribe()));

        if let Some(client) = self.jwks.clone() {
            let interval = Duration::from_secs(self.config.auth.jwks_refresh_secs);
            tokio::spawn(run_key_refresh(client, self.keys.clone(), interval, shutdown.subscribe()));
        }

        let sweep_interval = Duration::from_secs(self.config.rate_limit.sweep_interval_secs);
        tokio::spawn(run_bucket_sweeper(
            self.state.limiter.clone(),
            sweep_interval,
            shutdown.subscribe(),
        ));

        tokio::spawn(apply_config_updates(
            self.state.clone(),
            self.config.clone(),
            updates,
            shutdown.subscribe(),
        ));

        let mut stop = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn cors_layer(config: &CorsConfig) -> Result<CorsLayer, ServerError> {
    let origins = config
        .allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).map_err(|_| ServerError::Cors(format!("invalid origin '{}'", o))))
        .collect::<Result<Vec<_>, _>>()?;
    let methods = config
        .allowed_methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.as_bytes())
                .map_err(|_| ServerError::Cors(format!("invalid method '{}'", m)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, X_CORRELATION_ID])
        .expose_headers([X_CORRELATION_ID, X_RATELIMIT_REMAINING])
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs)))
}

/// Dispatcher for every request not served by the gateway itself.
async fn gateway_handler(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let correlation_id = request.extensions().get::<CorrelationId>().cloned();
    let mut route_label = String::from("none");

    let response = match dispatch(&state, request, &mut route_label).await {
        Ok(response) => response,
        Err(err) => {
            match &err {
                GatewayError::NoRoute => tracing::warn!(path = %path, "No route matched"),
                GatewayError::Internal(reason) => tracing::error!(reason = %reason, "Internal error"),
                other => tracing::info!(status = %other.status(), error = %other, "Request rejected"),
            }
            err.into_response_for(correlation_id.as_ref().map(CorrelationId::as_str))
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), &route_label, start);
    tracing::debug!(
        status = response.status().as_u16(),
        route = %route_label,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}

async fn dispatch(
    state: &AppState,
    request: Request,
    route_label: &mut String,
) -> Result<Response, GatewayError> {
    let path = request.uri().path().to_string();
    if has_unsafe_segments(&path) {
        return Err(GatewayError::InvalidPath);
    }

    let runtime = state.runtime.load_full();

    // Public paths never touch the authenticator.
    let principal = if runtime.policy.is_public(&path) {
        None
    } else {
        let token = bearer_token(request.headers())
            .ok_or(GatewayError::Unauthenticated)?
            .to_string();
        match state.authenticator.authenticate_refreshing(&token).await {
            Ok(principal) => Some(principal),
            Err(failure) => {
                metrics::record_auth_failure(failure.as_str());
                return Err(failure.into());
            }
        }
    };
    let identity = resolve_key(principal.as_ref());

    let route = runtime.router.match_route(&path).ok_or(GatewayError::NoRoute)?;
    route_label.clone_from(&route.id);

    let admitted = if route.rate_limited {
        match state.limiter.try_acquire(&identity, &route.id, route.limits) {
            Acquire::Admitted { remaining } => Some(remaining),
            Acquire::Rejected { retry_after } => {
                metrics::record_rate_limited(&route.id);
                tracing::info!(identity = %identity, route = %route.id, "Rate limit exceeded");
                return Err(GatewayError::RateLimited { retry_after });
            }
        }
    } else {
        None
    };

    match runtime.policy.authorize(&path, request.method(), principal.as_ref()) {
        Decision::Permit => {}
        Decision::Deny(DenyReason::Unauthenticated) => return Err(GatewayError::Unauthenticated),
        Decision::Deny(DenyReason::Forbidden) => return Err(GatewayError::Forbidden),
    }

    let target = strip_prefix_segments(&path, route.strip_prefix);
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{}?{}", target, query),
        None => target,
    };

    let instance = state
        .backends
        .load()
        .get(&route.upstream)
        .ok_or_else(|| GatewayError::NoHealthyUpstream(route.upstream.clone()))?;

    let correlation_id = request.extensions().get::<CorrelationId>().cloned();
    let mut response = state
        .forwarder
        .forward(
            instance,
            &route.upstream,
            request,
            &path_and_query,
            correlation_id.as_ref().map(CorrelationId::as_str),
        )
        .await?;

    if let Some(remaining) = admitted {
        add_rate_limit_headers(response.headers_mut(), remaining, route.limits);
    }
    Ok(response)
}

fn add_rate_limit_headers(headers: &mut HeaderMap, remaining: u32, limits: BucketLimits) {
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_BURST_CAPACITY, HeaderValue::from(limits.capacity));
    headers.insert(X_RATELIMIT_REPLENISH_RATE, HeaderValue::from(limits.refill_per_sec));
}

/// Periodically drop idle rate-limit buckets.
pub async fn run_bucket_sweeper(
    limiter: RateLimiter,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.sweep_idle(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, tracked = limiter.tracked_buckets(), "Swept idle rate-limit buckets");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Bucket sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

/// Apply validated configurations from the watcher.
async fn apply_config_updates(
    state: AppState,
    mut current: GatewayConfig,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(next) = update else { break };
                apply_config(&state, &current, &next);
                current = next;
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Swap in the tables compiled from `next`. A config that fails to compile
/// leaves the running tables untouched.
pub fn apply_config(state: &AppState, current: &GatewayConfig, next: &GatewayConfig) {
    let runtime = match Runtime::compile(next) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "Rejected configuration update, keeping current tables");
            return;
        }
    };
    state.runtime.store(Arc::new(runtime));

    let previous = state.backends.load_full();
    state
        .backends
        .store(Arc::new(BackendManager::rebuild(&next.backends, Some(&previous))));

    if current.auth.issuer != next.auth.issuer
        || current.auth.hmac_secret != next.auth.hmac_secret
        || current.auth.jwks_uri != next.auth.jwks_uri
        || current.listener.bind_address != next.listener.bind_address
    {
        tracing::warn!("Listener and token issuer settings changed; they take effect after a restart");
    }

    tracing::info!(
        routes = next.routes.len(),
        rules = next.auth.rules.len(),
        backends = next.backends.len(),
        "Configuration reloaded"
    );
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("authenticator", &self.authenticator)
            .field("tracked_buckets", &self.limiter.tracked_buckets())
            .finish_non_exhaustive()
    }
}
