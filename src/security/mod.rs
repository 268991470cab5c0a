//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Authenticated request on a rate-limited route:
//!     → rate_limit.rs (per identity + route token bucket)
//!     → Pass to authorization and forwarding
//!
//! Forwarding:
//!     → headers.rs (strip hop-by-hop, stamp gateway headers)
//! ```
//!
//! # Design Decisions
//! - Bucket state is injected, never global
//! - Fail closed: reject on any security check failure
//! - No trust in client-supplied hop-by-hop headers

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{Acquire, BucketLimits, BucketStore, RateLimiter};
