//! Rate-limit identity for a request.

use crate::auth::principal::Principal;

/// Shared bucket identity for every unauthenticated caller.
pub const ANONYMOUS_KEY: &str = "anonymous";

/// The caller's subject, or [`ANONYMOUS_KEY`] when there is none.
///
/// Never fails and never returns an empty string.
pub fn resolve_key(principal: Option<&Principal>) -> String {
    match principal {
        Some(p) if !p.subject.trim().is_empty() => p.subject.clone(),
        _ => ANONYMOUS_KEY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn subject_is_the_key() {
        let p = Principal::new("user-123", BTreeSet::new());
        assert_eq!(resolve_key(Some(&p)), "user-123");
    }

    #[test]
    fn no_principal_is_anonymous() {
        assert_eq!(resolve_key(None), ANONYMOUS_KEY);
    }

    #[test]
    fn blank_subject_is_anonymous() {
        let p = Principal::new("  ", BTreeSet::new());
        assert_eq!(resolve_key(Some(&p)), ANONYMOUS_KEY);
    }
}
