//! Declarative access control.
//!
//! # Responsibilities
//! - Decide whether a path is public (no authentication at all)
//! - Evaluate the rule table against the caller's authorities
//!
//! # Design Decisions
//! - Public paths are checked before authentication so public endpoints
//!   never pay for (or fail on) token validation
//! - Rules are ranked once at load time: most specific pattern first, then
//!   method-qualified rules, then declaration order
//! - No matching rule means "authenticated only"
//!
//! # Data Flow
//! ```text
//! path ─► is_public? ──yes──► Permit
//!              │no
//!              ▼
//!      principal? ──no──► Deny(Unauthenticated)
//!              │yes
//!              ▼
//!      first ranked rule matching (path, method)
//!        ├─ satisfied ─► Permit
//!        ├─ not satisfied ─► Deny(Forbidden)
//!        └─ none ─► Permit
//! ```

pub mod rules;

use std::cmp::Reverse;

use axum::http::Method;

use crate::auth::principal::Principal;
use crate::config::AuthConfig;
use crate::routing::matcher::PathPattern;

pub use rules::{AuthorizationRule, PolicyError, RequiredAuthority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No valid token on a protected path (401).
    Unauthenticated,
    /// Valid identity without the required authority (403).
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit)
    }
}

/// Compiled public paths and ranked authorization rules.
#[derive(Debug, Default)]
pub struct AuthorizationPolicy {
    public: Vec<PathPattern>,
    rules: Vec<AuthorizationRule>,
}

impl AuthorizationPolicy {
    pub fn from_config(config: &AuthConfig) -> Result<Self, PolicyError> {
        let public = config
            .public_paths
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rules = config
            .rules
            .iter()
            .map(AuthorizationRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        // Stable sort keeps declaration order among equals.
        rules.sort_by_key(|r| Reverse(r.precedence()));

        Ok(Self { public, rules })
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public.iter().any(|p| p.matches(path))
    }

    /// Ranked rule table, highest precedence first.
    pub fn rules(&self) -> &[AuthorizationRule] {
        &self.rules
    }

    pub fn public_paths(&self) -> &[PathPattern] {
        &self.public
    }

    pub fn authorize(&self, path: &str, method: &Method, principal: Option<&Principal>) -> Decision {
        if self.is_public(path) {
            return Decision::Permit;
        }

        let Some(principal) = principal else {
            return Decision::Deny(DenyReason::Unauthenticated);
        };

        match self.rules.iter().find(|r| r.applies_to(path, method)) {
            Some(rule) if rule.required.is_satisfied_by(principal) => Decision::Permit,
            Some(rule) => {
                tracing::debug!(
                    subject = %principal.subject,
                    rule = %rule.pattern,
                    "Caller lacks required authority"
                );
                Decision::Deny(DenyReason::Forbidden)
            }
            None => Decision::Permit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::Authority;
    use crate::config::AuthorizationRuleConfig;

    fn policy() -> AuthorizationPolicy {
        AuthorizationPolicy::from_config(&AuthConfig::default()).unwrap()
    }

    fn with_roles(roles: &[&str]) -> Principal {
        Principal::new("u1", roles.iter().map(|r| Authority::role(r)).collect())
    }

    #[test]
    fn admin_console_requires_admin() {
        let p = policy();
        assert_eq!(
            p.authorize("/api/admin-console/x", &Method::GET, Some(&with_roles(&["USER"]))),
            Decision::Deny(DenyReason::Forbidden)
        );
        assert_eq!(
            p.authorize("/api/admin-console/x", &Method::GET, Some(&with_roles(&["ADMIN"]))),
            Decision::Permit
        );
    }

    #[test]
    fn reports_allow_manager_or_owner_only() {
        let p = policy();
        for role in ["MANAGER", "OWNER"] {
            assert!(p
                .authorize("/api/management/reports/y", &Method::GET, Some(&with_roles(&[role])))
                .is_permit());
        }
        assert_eq!(
            p.authorize("/api/management/reports/y", &Method::GET, Some(&with_roles(&["ADMIN"]))),
            Decision::Deny(DenyReason::Forbidden)
        );
    }

    #[test]
    fn public_paths_need_no_principal() {
        let p = policy();
        assert!(p.is_public("/api/auth/login"));
        assert!(p.is_public("/actuator/health"));
        assert!(p.authorize("/api/auth/signup", &Method::POST, None).is_permit());
        assert!(!p.is_public("/api/auth/logout"));
    }

    #[test]
    fn protected_path_without_principal_is_unauthenticated() {
        assert_eq!(
            policy().authorize("/api/v1/users/1", &Method::GET, None),
            Decision::Deny(DenyReason::Unauthenticated)
        );
    }

    #[test]
    fn unmatched_path_is_authenticated_only() {
        let p = policy();
        assert!(p.authorize("/api/other", &Method::GET, Some(&with_roles(&[]))).is_permit());
        assert!(!p.authorize("/api/other", &Method::GET, None).is_permit());
    }

    #[test]
    fn unlisted_method_falls_through_to_default() {
        // Product rules only cover GET/POST/PUT/DELETE.
        let p = policy();
        assert!(p
            .authorize("/api/products/1", &Method::PATCH, Some(&with_roles(&[])))
            .is_permit());
        assert!(!p
            .authorize("/api/products/1", &Method::GET, Some(&with_roles(&[])))
            .is_permit());
    }

    #[test]
    fn specific_method_rule_beats_broader_rule() {
        let config = AuthConfig {
            public_paths: Vec::new(),
            rules: vec![
                AuthorizationRuleConfig {
                    path: "/api/products/**".into(),
                    roles: vec!["USER".into()],
                    ..Default::default()
                },
                AuthorizationRuleConfig {
                    path: "/api/products/admin/**".into(),
                    method: Some("DELETE".into()),
                    roles: vec!["ADMIN".into()],
                    ..Default::default()
                },
            ],
            ..AuthConfig::default()
        };
        let p = AuthorizationPolicy::from_config(&config).unwrap();
        let user = with_roles(&["USER"]);

        assert_eq!(
            p.authorize("/api/products/admin/7", &Method::DELETE, Some(&user)),
            Decision::Deny(DenyReason::Forbidden)
        );
        assert!(p.authorize("/api/products/admin/7", &Method::GET, Some(&user)).is_permit());
    }

    #[test]
    fn method_qualified_wins_on_equal_pattern() {
        let config = AuthConfig {
            public_paths: Vec::new(),
            rules: vec![
                AuthorizationRuleConfig {
                    path: "/r/**".into(),
                    roles: vec!["A".into()],
                    ..Default::default()
                },
                AuthorizationRuleConfig {
                    path: "/r/**".into(),
                    method: Some("POST".into()),
                    roles: vec!["B".into()],
                    ..Default::default()
                },
            ],
            ..AuthConfig::default()
        };
        let p = AuthorizationPolicy::from_config(&config).unwrap();
        assert!(p.authorize("/r/x", &Method::POST, Some(&with_roles(&["B"]))).is_permit());
        assert!(!p.authorize("/r/x", &Method::POST, Some(&with_roles(&["A"]))).is_permit());
    }

    #[test]
    fn ties_go_to_the_earlier_rule() {
        let config = AuthConfig {
            public_paths: Vec::new(),
            rules: vec![
                AuthorizationRuleConfig {
                    path: "/t/*".into(),
                    roles: vec!["FIRST".into()],
                    ..Default::default()
                },
                AuthorizationRuleConfig {
                    path: "/t/*".into(),
                    roles: vec!["SECOND".into()],
                    ..Default::default()
                },
            ],
            ..AuthConfig::default()
        };
        let p = AuthorizationPolicy::from_config(&config).unwrap();
        assert!(p.authorize("/t/1", &Method::GET, Some(&with_roles(&["FIRST"]))).is_permit());
        assert!(!p.authorize("/t/1", &Method::GET, Some(&with_roles(&["SECOND"]))).is_permit());
    }
}
