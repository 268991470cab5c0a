//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → logical upstream identified
//!     → pool.rs (instances registered for that service)
//!     → round_robin.rs (rotate through healthy instances)
//!     → backend.rs (reserve an in-flight slot)
//!     → Return guard or NoHealthyUpstream
//! ```
//!
//! # Design Decisions
//! - Selection is stateless apart from the rotation counter
//! - Unhealthy instances are excluded from selection
//! - Instances that survive a config reload keep their health state

pub mod backend;
pub mod pool;
pub mod round_robin;

use std::sync::Arc;

use backend::Backend;

pub use backend::{BackendConnectionGuard, HealthState};
pub use pool::BackendManager;

/// Instance selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
