//! Route lookup and path rewriting.
//!
//! # Responsibilities
//! - Store compiled routes in declaration order
//! - Look up the first route matching a request path
//! - Rewrite the path by stripping leading segments
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan; route tables are small
//! - Explicit `None` rather than a silent default route

use crate::config::{RateLimitConfig, RouteConfig};
use crate::routing::matcher::{path_segments, PathPattern, PatternError};
use crate::security::rate_limit::BucketLimits;

/// A compiled route rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub id: String,
    pub pattern: PathPattern,
    pub strip_prefix: usize,
    /// Logical upstream service name (scheme removed).
    pub upstream: String,
    pub rate_limited: bool,
    pub limits: BucketLimits,
}

/// Ordered route table. First match wins.
#[derive(Debug, Default)]
pub struct RequestRouter {
    routes: Vec<RouteRule>,
}

impl RequestRouter {
    /// Compile routes from configuration, applying default bucket limits
    /// where a route declares none.
    pub fn from_config(
        routes: &[RouteConfig],
        defaults: &RateLimitConfig,
    ) -> Result<Self, PatternError> {
        let routes = routes
            .iter()
            .map(|r| {
                let limits = r
                    .rate_limit
                    .map(|l| BucketLimits::new(l.capacity, l.refill_per_sec))
                    .unwrap_or_else(|| BucketLimits::new(defaults.capacity, defaults.refill_per_sec));
                Ok(RouteRule {
                    id: r.id.clone(),
                    pattern: PathPattern::parse(&r.path)?,
                    strip_prefix: r.strip_prefix,
                    upstream: upstream_name(&r.upstream).to_string(),
                    rate_limited: r.rate_limited,
                    limits,
                })
            })
            .collect::<Result<Vec<_>, PatternError>>()?;

        Ok(Self { routes })
    }

    /// Find the first route whose pattern matches `path`.
    pub fn match_route(&self, path: &str) -> Option<&RouteRule> {
        self.routes.iter().find(|r| r.pattern.matches(path))
    }

    pub fn routes(&self) -> &[RouteRule] {
        &self.routes
    }
}

/// `lb://user-service` → `user-service`.
pub fn upstream_name(upstream: &str) -> &str {
    upstream
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(upstream)
        .trim_end_matches('/')
}

/// Remove `count` leading segments from `path`.
///
/// `/api/v1/users/42` with 2 gives `/users/42`; removing every segment
/// gives `/`. A trailing slash on the original path is preserved.
pub fn strip_prefix_segments(path: &str, count: usize) -> String {
    if count == 0 {
        return if path.is_empty() { "/".to_string() } else { path.to_string() };
    }

    let rest: Vec<&str> = path_segments(path).skip(count).collect();
    let mut stripped = format!("/{}", rest.join("/"));
    if path.ends_with('/') && !rest.is_empty() {
        stripped.push('/');
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, RouteRateLimit};

    fn router(routes: Vec<RouteConfig>) -> RequestRouter {
        RequestRouter::from_config(&routes, &RateLimitConfig::default()).unwrap()
    }

    fn route(id: &str, path: &str) -> RouteConfig {
        RouteConfig {
            id: id.into(),
            path: path.into(),
            strip_prefix: 0,
            upstream: format!("lb://{}", id),
            rate_limited: false,
            rate_limit: None,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let r = router(vec![route("narrow", "/api/v1/users/**"), route("wide", "/api/**")]);
        assert_eq!(r.match_route("/api/v1/users/42").unwrap().id, "narrow");
        assert_eq!(r.match_route("/api/products").unwrap().id, "wide");

        let r = router(vec![route("wide", "/api/**"), route("narrow", "/api/v1/users/**")]);
        assert_eq!(r.match_route("/api/v1/users/42").unwrap().id, "wide");
    }

    #[test]
    fn test_no_route() {
        let r = router(vec![route("users", "/api/v1/users/**")]);
        assert!(r.match_route("/api/v2/users").is_none());
    }

    #[test]
    fn test_strip_prefix_segments() {
        assert_eq!(strip_prefix_segments("/api/v1/users/42", 2), "/users/42");
        assert_eq!(strip_prefix_segments("/api/v1/users/42", 3), "/42");
        assert_eq!(strip_prefix_segments("/api/products", 2), "/");
        assert_eq!(strip_prefix_segments("/api", 5), "/");
        assert_eq!(strip_prefix_segments("/api/products/", 1), "/products/");
        assert_eq!(strip_prefix_segments("/keep/me", 0), "/keep/me");
    }

    #[test]
    fn test_upstream_name() {
        assert_eq!(upstream_name("lb://user-service"), "user-service");
        assert_eq!(upstream_name("user-service"), "user-service");
        assert_eq!(upstream_name("lb://product-service/"), "product-service");
    }

    #[test]
    fn test_route_limits_default_and_override() {
        let mut limited = route("orders", "/api/orders/**");
        limited.rate_limited = true;
        limited.rate_limit = Some(RouteRateLimit { capacity: 3, refill_per_sec: 1 });

        let r = router(vec![limited, route("users", "/api/v1/users/**")]);
        assert_eq!(r.routes()[0].limits, BucketLimits::new(3, 1));
        assert_eq!(r.routes()[1].limits, BucketLimits::new(20, 10));
    }

    #[test]
    fn test_default_table_compiles() {
        let config = GatewayConfig::default();
        let r = RequestRouter::from_config(&config.routes, &config.rate_limit).unwrap();
        let users = r.match_route("/api/v1/users/42").unwrap();
        assert_eq!(users.upstream, "user-service");
        assert_eq!(strip_prefix_segments("/api/v1/users/42", users.strip_prefix), "/users/42");
    }
}
