//! Access-token claims and authority derivation.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::auth::principal::Authority;

/// Claim carrying the caller's single primary role.
pub const PRIMARY_ROLE_CLAIM: &str = "primary_role";

/// Decoded access-token claims.
///
/// `exp`, `iss` and signature are checked by the authenticator before this
/// type is ever observed.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iss: String,
    pub exp: u64,

    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub nbf: Option<u64>,

    #[serde(default)]
    pub primary_role: Option<String>,

    #[serde(default)]
    pub scp: Option<ScopeClaim>,
    #[serde(default)]
    pub scope: Option<ScopeClaim>,
}

/// Scopes are either a space-delimited string or an array of strings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

impl ScopeClaim {
    pub fn names(&self) -> Vec<&str> {
        match self {
            ScopeClaim::Delimited(s) => s.split_whitespace().collect(),
            ScopeClaim::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Compute the authority set for a set of claims.
///
/// - every scope in `scp` (or `scope` when `scp` is absent) → `SCOPE_<name>`
/// - a non-blank `primary_role` → `ROLE_<NAME>`
///
/// Neither claim present yields an empty set, which still denotes an
/// authenticated caller.
pub fn derive_authorities(claims: &TokenClaims) -> BTreeSet<Authority> {
    let mut authorities: BTreeSet<Authority> = claims
        .scp
        .as_ref()
        .or(claims.scope.as_ref())
        .map(|scopes| scopes.names().into_iter().map(Authority::scope).collect())
        .unwrap_or_default();

    match claims.primary_role.as_deref().map(str::trim) {
        Some(role) if !role.is_empty() => {
            let authority = Authority::role(role);
            tracing::debug!(authority = %authority, "Derived primary role");
            authorities.insert(authority);
        }
        _ => tracing::debug!("No '{}' claim in token", PRIMARY_ROLE_CLAIM),
    }

    authorities
}
