//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (ordered route lookup)
//!     → matcher.rs (segment-wise pattern evaluation)
//!     → Return: matched RouteRule or None
//!     → router.rs (strip leading segments for the upstream)
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile PathPatterns
//!     → Resolve per-route bucket limits
//!     → Freeze as immutable RequestRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled at load time, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins (declaration order)

pub mod matcher;
pub mod router;

pub use matcher::{PathPattern, PatternError};
pub use router::{RequestRouter, RouteRule};
