//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference registered services)
//! - Validate value ranges (capacities and timeouts > 0, addresses parse)
//! - Compile every pattern once so bad patterns fail at load time
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted, at startup and on reload

use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::config::schema::GatewayConfig;
use crate::policy::AuthorizationRule;
use crate::routing::matcher::PathPattern;
use crate::routing::router::upstream_name;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: String, value: String },
    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("duplicate {kind} '{id}'")]
    Duplicate { kind: &'static str, id: String },
    #[error("route '{route}' targets service '{service}' which has no instances")]
    UnknownService { route: String, service: String },
    #[error("{field}: {reason}")]
    InvalidPattern { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn check_addr(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn check_pattern(field: String, pattern: &str, errors: &mut Vec<ValidationError>) {
    if let Err(e) = PathPattern::parse(pattern) {
        errors.push(ValidationError::InvalidPattern {
            field,
            reason: e.to_string(),
        });
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr("listener.bind_address", &config.listener.bind_address, &mut errors);
    if config.listener.max_body_bytes == 0 {
        errors.push(invalid("listener.max_body_bytes", "must be greater than 0"));
    }

    // Backends
    let mut instance_names = HashSet::new();
    let mut services = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        if !instance_names.insert(backend.name.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "backend",
                id: backend.name.clone(),
            });
        }
        check_addr(&format!("backends[{}].address", i), &backend.address, &mut errors);
        if backend.max_connections == 0 {
            errors.push(invalid(format!("backends[{}].max_connections", i), "must be greater than 0"));
        }
        services.insert(backend.group.as_str());
    }

    // Routes
    let mut route_ids = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if route.id.trim().is_empty() {
            errors.push(invalid(format!("routes[{}].id", i), "must not be empty"));
        } else if !route_ids.insert(route.id.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "route",
                id: route.id.clone(),
            });
        }
        check_pattern(format!("routes[{}].path", i), &route.path, &mut errors);

        let service = upstream_name(&route.upstream);
        if service.is_empty() {
            errors.push(invalid(format!("routes[{}].upstream", i), "must not be empty"));
        } else if !services.contains(service) {
            errors.push(ValidationError::UnknownService {
                route: route.id.clone(),
                service: service.to_string(),
            });
        }

        if let Some(limits) = &route.rate_limit {
            if limits.capacity == 0 {
                errors.push(invalid(format!("routes[{}].rate_limit.capacity", i), "must be greater than 0"));
            }
        }
    }

    // Auth
    let auth = &config.auth;
    if url::Url::parse(&auth.issuer).is_err() {
        errors.push(invalid("auth.issuer", format!("'{}' is not a valid URL", auth.issuer)));
    }
    if let Some(uri) = &auth.jwks_uri {
        if url::Url::parse(uri).is_err() {
            errors.push(invalid("auth.jwks_uri", format!("'{}' is not a valid URL", uri)));
        }
    }
    if auth.algorithms.is_empty() {
        errors.push(invalid("auth.algorithms", "at least one algorithm is required"));
    }
    for alg in &auth.algorithms {
        match Algorithm::from_str(alg) {
            Ok(Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) if auth.hmac_secret.is_none() => {
                errors.push(invalid("auth.hmac_secret", format!("required when accepting {}", alg)));
            }
            Ok(_) => {}
            Err(_) => errors.push(invalid("auth.algorithms", format!("unknown algorithm '{}'", alg))),
        }
    }
    if auth.jwks_refresh_secs == 0 {
        errors.push(invalid("auth.jwks_refresh_secs", "must be greater than 0"));
    }
    for (i, path) in auth.public_paths.iter().enumerate() {
        check_pattern(format!("auth.public_paths[{}]", i), path, &mut errors);
    }
    for (i, rule) in auth.rules.iter().enumerate() {
        if let Err(e) = AuthorizationRule::from_config(rule) {
            errors.push(ValidationError::InvalidPattern {
                field: format!("auth.rules[{}]", i),
                reason: e.to_string(),
            });
        }
    }

    // Rate limiting
    let rl = &config.rate_limit;
    if rl.capacity == 0 {
        errors.push(invalid("rate_limit.capacity", "must be greater than 0"));
    }
    if rl.idle_ttl_secs == 0 {
        errors.push(invalid("rate_limit.idle_ttl_secs", "must be greater than 0"));
    }
    if rl.sweep_interval_secs == 0 {
        errors.push(invalid("rate_limit.sweep_interval_secs", "must be greater than 0"));
    }
    if rl.max_tracked_keys == 0 {
        errors.push(invalid("rate_limit.max_tracked_keys", "must be greater than 0"));
    }

    // Health checks
    let hc = &config.health_check;
    if hc.enabled {
        if hc.interval_secs == 0 {
            errors.push(invalid("health_check.interval_secs", "must be greater than 0"));
        }
        if hc.unhealthy_threshold == 0 || hc.healthy_threshold == 0 {
            errors.push(invalid("health_check", "thresholds must be greater than 0"));
        }
        if !hc.path.starts_with('/') {
            errors.push(invalid("health_check.path", "must start with '/'"));
        }
    }

    // Timeouts
    let t = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_secs", t.connect_secs),
        ("timeouts.upstream_secs", t.upstream_secs),
        ("timeouts.request_secs", t.request_secs),
    ] {
        if value == 0 {
            errors.push(invalid(field, "must be greater than 0"));
        }
    }

    // Observability
    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(invalid("observability.log_format", "must be 'pretty' or 'json'"));
    }
    if obs.metrics_enabled {
        check_addr("observability.metrics_address", &obs.metrics_address, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
