//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! the defaults reproduce the stock deployment (user, auth and product
//! services behind `/api`).

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Ordered route table. First match wins.
    pub routes: Vec<RouteConfig>,

    /// Upstream instances, grouped by logical service name.
    pub backends: Vec<BackendConfig>,

    /// Token validation, public paths and authorization rules.
    pub auth: AuthConfig,

    /// Per-identity rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Cross-origin settings for browser clients.
    pub cors: CorsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            routes: default_routes(),
            backends: default_backends(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            health_check: HealthCheckConfig::default(),
            timeouts: TimeoutConfig::default(),
            cors: CorsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// A single route: path pattern to logical upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier, used for logs, metrics and rate-limit buckets.
    pub id: String,

    /// Path pattern (`/api/v1/users/**`).
    pub path: String,

    /// Number of leading path segments removed before forwarding.
    #[serde(default)]
    pub strip_prefix: usize,

    /// Logical upstream service, optionally written as `lb://name`.
    pub upstream: String,

    /// Whether requests on this route pass through the rate limiter.
    #[serde(default)]
    pub rate_limited: bool,

    /// Route-specific bucket limits. Falls back to `[rate_limit]` defaults.
    #[serde(default)]
    pub rate_limit: Option<RouteRateLimit>,
}

/// Bucket limits for one route.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteRateLimit {
    /// Burst capacity.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: u32,
}

/// Upstream instance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique instance identifier.
    pub name: String,

    /// Logical service this instance serves (matched against route upstreams).
    pub group: String,

    /// Instance address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Maximum concurrent in-flight requests to this instance.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections: usize,
}

fn default_max_backend_conns() -> usize {
    100
}

/// Token validation and access rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Trusted issuer; must equal the `iss` claim.
    pub issuer: String,

    /// Explicit JWKS location. Discovered from the issuer when absent.
    pub jwks_uri: Option<String>,

    /// Shared HMAC secret. Meant for local development and tests.
    pub hmac_secret: Option<String>,

    /// Accepted JWS algorithms.
    pub algorithms: Vec<String>,

    /// Allowed clock skew for `exp`/`nbf` in seconds.
    pub leeway_secs: u64,

    /// Interval between JWKS refreshes in seconds.
    pub jwks_refresh_secs: u64,

    /// Minimum spacing of refetches triggered by an unknown `kid`.
    pub jwks_min_refetch_secs: u64,

    /// Timeout for discovery and JWKS requests in seconds.
    pub jwks_timeout_secs: u64,

    /// Paths exempt from authentication.
    pub public_paths: Vec<String>,

    /// Ordered authorization rules.
    pub rules: Vec<AuthorizationRuleConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://keycloak:8080/realms/shop".to_string(),
            jwks_uri: None,
            hmac_secret: None,
            algorithms: vec!["RS256".to_string()],
            leeway_secs: 30,
            jwks_refresh_secs: 300,
            jwks_min_refetch_secs: 30,
            jwks_timeout_secs: 5,
            public_paths: vec![
                "/api/auth/signup".to_string(),
                "/api/auth/login".to_string(),
                "/api/auth/refresh-token".to_string(),
                "/actuator/**".to_string(),
            ],
            rules: default_rules(),
        }
    }
}

/// One authorization rule.
///
/// With neither `roles` nor `authorities` set the rule only requires an
/// authenticated caller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationRuleConfig {
    /// Path pattern.
    pub path: String,

    /// HTTP method, or `None`/`"*"` for any.
    #[serde(default)]
    pub method: Option<String>,

    /// Role names; each becomes `ROLE_<NAME>`.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Raw authorities (`SCOPE_read`, `ROLE_ADMIN`).
    #[serde(default)]
    pub authorities: Vec<String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Default burst capacity for rate-limited routes.
    pub capacity: u32,

    /// Default tokens per second for rate-limited routes.
    pub refill_per_sec: u32,

    /// Buckets untouched for this long are dropped.
    pub idle_ttl_secs: u64,

    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,

    /// Upper bound on tracked buckets.
    pub max_tracked_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_sec: 10,
            idle_ttl_secs: 600,
            sweep_interval_secs: 60,
            max_tracked_keys: 100_000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on each instance.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/actuator/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream call timeout in seconds.
    pub upstream_secs: u64,

    /// Total request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 2,
            upstream_secs: 10,
            request_secs: 30,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allow_credentials: true,
            max_age_secs: 3600,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

fn default_routes() -> Vec<RouteConfig> {
    [
        ("user-service-route", "/api/v1/users/**", "lb://user-service"),
        ("auth-service-route", "/api/auth/**", "lb://auth-service"),
        ("product-service-route", "/api/products/**", "lb://product-service"),
    ]
    .into_iter()
    .map(|(id, path, upstream)| RouteConfig {
        id: id.to_string(),
        path: path.to_string(),
        strip_prefix: 2,
        upstream: upstream.to_string(),
        rate_limited: true,
        rate_limit: None,
    })
    .collect()
}

fn default_backends() -> Vec<BackendConfig> {
    [
        ("user-service-1", "user-service", "127.0.0.1:8081"),
        ("auth-service-1", "auth-service", "127.0.0.1:8082"),
        ("product-service-1", "product-service", "127.0.0.1:8083"),
    ]
    .into_iter()
    .map(|(name, group, address)| BackendConfig {
        name: name.to_string(),
        group: group.to_string(),
        address: address.to_string(),
        max_connections: default_max_backend_conns(),
    })
    .collect()
}

fn default_rules() -> Vec<AuthorizationRuleConfig> {
    let rule = |path: &str, method: Option<&str>, roles: &[&str]| AuthorizationRuleConfig {
        path: path.to_string(),
        method: method.map(str::to_string),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        authorities: Vec::new(),
    };

    vec![
        rule("/api/admin-console/**", None, &["ADMIN"]),
        rule("/api/management/reports/**", None, &["MANAGER", "OWNER"]),
        rule("/api/products/**", Some("GET"), &["USER"]),
        rule("/api/products/**", Some("POST"), &["USER"]),
        rule("/api/products/**", Some("PUT"), &["USER"]),
        rule("/api/products/**", Some("DELETE"), &["USER"]),
        rule("/api/v1/users/**", None, &["USER"]),
    ]
}
