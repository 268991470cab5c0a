//! Authenticated identity for one request.

use std::collections::BTreeSet;
use std::fmt;

/// An opaque permission tag such as `ROLE_ADMIN` or `SCOPE_read`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Authority(String);

impl Authority {
    pub const ROLE_PREFIX: &'static str = "ROLE_";
    pub const SCOPE_PREFIX: &'static str = "SCOPE_";

    /// Role-derived authority: the trimmed name is uppercased.
    pub fn role(name: &str) -> Self {
        Self(format!("{}{}", Self::ROLE_PREFIX, name.trim().to_uppercase()))
    }

    /// Scope-derived authority: the name keeps its case.
    pub fn scope(name: &str) -> Self {
        Self(format!("{}{}", Self::SCOPE_PREFIX, name))
    }

    /// An authority taken verbatim from configuration.
    pub fn raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved identity and authority set. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub authorities: BTreeSet<Authority>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, authorities: BTreeSet<Authority>) -> Self {
        Self {
            subject: subject.into(),
            authorities,
        }
    }

    pub fn has_authority(&self, authority: &Authority) -> bool {
        self.authorities.contains(authority)
    }

    /// True if any of `required` is held.
    pub fn has_any<'a>(&self, required: impl IntoIterator<Item = &'a Authority>) -> bool {
        required.into_iter().any(|a| self.has_authority(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_trimmed_and_uppercased() {
        assert_eq!(Authority::role(" AdMiN ").as_str(), "ROLE_ADMIN");
    }

    #[test]
    fn scope_keeps_case() {
        assert_eq!(Authority::scope("Read").as_str(), "SCOPE_Read");
    }

    #[test]
    fn has_any_is_or_semantics() {
        let p = Principal::new("u1", [Authority::role("owner")].into_iter().collect());
        let wanted = [Authority::role("manager"), Authority::role("owner")];
        assert!(p.has_any(&wanted));
        assert!(!p.has_any(&[Authority::role("admin")]));
        assert!(!p.has_any(&[]));
    }

    #[test]
    fn has_authority_is_exact() {
        let p = Principal::new("u1", [Authority::scope("read")].into_iter().collect());
        assert!(p.has_authority(&Authority::raw("SCOPE_read")));
        assert!(!p.has_authority(&Authority::raw("SCOPE_READ")));
    }
}
