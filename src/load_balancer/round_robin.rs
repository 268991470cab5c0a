//! Round-robin selection over healthy instances.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        // One pass at most, skipping unhealthy instances.
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = backends.len();
        (0..len)
            .map(|i| &backends[(start + i) % len])
            .find(|b| b.is_healthy())
            .cloned()
    }
}
