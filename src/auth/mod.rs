//! Caller authentication.
//!
//! # Responsibilities
//! - Extract and validate bearer tokens
//! - Derive the caller's authority set from token claims
//! - Resolve the identity used for rate limiting
//! - Keep the issuer's signing keys current
//!
//! # Data Flow
//! ```text
//! Authorization header → bearer_token → TokenAuthenticator → Principal
//!                                              ↑                 ↓
//!                                          KeyStore        resolve_key
//! ```

pub mod authenticator;
pub mod claims;
pub mod identity;
pub mod keys;
pub mod principal;

pub use authenticator::{bearer_token, AuthFailure, AuthSetupError, TokenAuthenticator};
pub use identity::{resolve_key, ANONYMOUS_KEY};
pub use keys::{JwksClient, KeySet, KeyStore};
pub use principal::{Authority, Principal};
