//! Upstream health checking.
//!
//! # Data Flow
//! ```text
//! Active (active.rs):
//!     Periodic timer → probe each instance → mark_success / mark_failure
//!
//! Passive (http::forward):
//!     Connect error, timeout or 502/503/504 → mark_failure
//!     Any other response → mark_success
//! ```
//!
//! # Design Decisions
//! - Active and passive checks feed the same per-instance state
//! - Transitions require consecutive successes/failures to avoid flapping
//! - 4xx responses are client errors and never count against an instance

pub mod active;

pub use active::HealthMonitor;
