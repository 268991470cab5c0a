//! Compiled authorization rules.

use std::collections::BTreeSet;

use axum::http::Method;

use crate::auth::principal::{Authority, Principal};
use crate::config::AuthorizationRuleConfig;
use crate::routing::matcher::{PathPattern, PatternError, Specificity};

/// Error compiling the rule table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("rule for '{path}' has invalid method '{method}'")]
    InvalidMethod { path: String, method: String },
}

/// What a matching rule demands of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredAuthority {
    /// Any authenticated caller.
    Authenticated,
    /// At least one of these authorities.
    AnyOf(BTreeSet<Authority>),
}

impl RequiredAuthority {
    pub fn is_satisfied_by(&self, principal: &Principal) -> bool {
        match self {
            RequiredAuthority::Authenticated => true,
            RequiredAuthority::AnyOf(required) => principal.has_any(required),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationRule {
    pub pattern: PathPattern,
    /// `None` matches every method.
    pub method: Option<Method>,
    pub required: RequiredAuthority,
}

impl AuthorizationRule {
    pub fn from_config(config: &AuthorizationRuleConfig) -> Result<Self, PolicyError> {
        let pattern = PathPattern::parse(&config.path)?;

        let method = match config.method.as_deref().map(str::trim) {
            None | Some("") | Some("*") => None,
            Some(m) => Some(Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(
                |_| PolicyError::InvalidMethod {
                    path: config.path.clone(),
                    method: m.to_string(),
                },
            )?),
        };

        let authorities: BTreeSet<Authority> = config
            .roles
            .iter()
            .map(|r| Authority::role(r))
            .chain(config.authorities.iter().map(|a| Authority::raw(a.trim())))
            .collect();

        let required = if authorities.is_empty() {
            RequiredAuthority::Authenticated
        } else {
            RequiredAuthority::AnyOf(authorities)
        };

        Ok(Self {
            pattern,
            method,
            required,
        })
    }

    pub fn applies_to(&self, path: &str, method: &Method) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && self.pattern.matches(path)
    }

    /// Precedence key: pattern specificity, then method qualification.
    pub(crate) fn precedence(&self) -> (Specificity, bool) {
        (self.pattern.specificity(), self.method.is_some())
    }
}
