//! Upstream instance pools.
//!
//! # Responsibilities
//! - Group instances by logical service name
//! - Select an instance with the group's balancing strategy
//! - Carry instance state across configuration reloads

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::load_balancer::{
    backend::{Backend, BackendConnectionGuard},
    round_robin::RoundRobin,
    LoadBalancer,
};

#[derive(Debug)]
struct Group {
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
}

/// Instance pools keyed by logical service name.
#[derive(Debug, Default)]
pub struct BackendManager {
    groups: HashMap<String, Group>,
}

impl BackendManager {
    pub fn new(configs: &[BackendConfig]) -> Self {
        Self::rebuild(configs, None)
    }

    /// Build a manager for `configs`, reusing instances from `previous`
    /// whose name and address are unchanged.
    pub fn rebuild(configs: &[BackendConfig], previous: Option<&BackendManager>) -> Self {
        let existing: HashMap<(&str, SocketAddr), &Arc<Backend>> = previous
            .map(|p| {
                p.groups
                    .values()
                    .flat_map(|g| g.backends.iter())
                    .map(|b| ((b.name.as_str(), b.addr), b))
                    .collect()
            })
            .unwrap_or_default();

        let mut grouped: HashMap<String, Vec<Arc<Backend>>> = HashMap::new();
        for config in configs {
            let addr: SocketAddr = match config.address.parse() {
                Ok(a) => a,
                Err(_) => {
                    tracing::warn!(instance = %config.name, address = %config.address, "Invalid upstream address, skipping");
                    continue;
                }
            };

            let backend = match existing.get(&(config.name.as_str(), addr)) {
                Some(b) if b.max_connections == config.max_connections => Arc::clone(b),
                _ => Arc::new(Backend::new(&config.name, addr, config.max_connections)),
            };
            grouped.entry(config.group.clone()).or_default().push(backend);
        }

        let groups = grouped
            .into_iter()
            .map(|(name, backends)| {
                let balancer: Box<dyn LoadBalancer> = Box::new(RoundRobin::new());
                (name, Group { backends, balancer })
            })
            .collect();

        Self { groups }
    }

    /// Select an instance of `service` and reserve a slot on it.
    pub fn get(&self, service: &str) -> Option<BackendConnectionGuard> {
        let Some(group) = self.groups.get(service) else {
            tracing::debug!(service = %service, "No instances registered for service");
            return None;
        };

        // Saturated instances are skipped like unhealthy ones.
        for _ in 0..group.backends.len() {
            let backend = group.balancer.next_server(&group.backends)?;
            if let Some(guard) = backend.try_create_guard() {
                return Some(guard);
            }
        }

        tracing::debug!(service = %service, instances = group.backends.len(), "All instances saturated");
        None
    }

    pub fn contains(&self, service: &str) -> bool {
        self.groups.contains_key(service)
    }

    /// Instances of `service` (empty if unknown).
    pub fn instances(&self, service: &str) -> &[Arc<Backend>] {
        self.groups
            .get(service)
            .map(|g| g.backends.as_slice())
            .unwrap_or_default()
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Every instance, for health checking.
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.groups
            .values()
            .flat_map(|g| g.backends.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, group: &str, port: u16) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            group: group.to_string(),
            address: format!("127.0.0.1:{}", port),
            max_connections: 10,
        }
    }

    #[test]
    fn groups_by_service() {
        let m = BackendManager::new(&[
            config("u1", "user-service", 8081),
            config("u2", "user-service", 8091),
            config("p1", "product-service", 8083),
        ]);
        assert_eq!(m.instances("user-service").len(), 2);
        assert_eq!(m.instances("product-service").len(), 1);
        assert!(m.get("user-service").is_some());
        assert!(m.get("missing").is_none());
    }

    #[test]
    fn invalid_address_skipped() {
        let mut bad = config("x", "svc", 1);
        bad.address = "not-an-address".to_string();
        let m = BackendManager::new(&[bad]);
        assert!(m.get("svc").is_none());
    }

    #[test]
    fn unhealthy_group_yields_none() {
        let m = BackendManager::new(&[config("u1", "user-service", 8081)]);
        m.instances("user-service")[0].mark_failure(1);
        assert!(m.get("user-service").is_none());
    }

    #[test]
    fn rebuild_keeps_instance_state() {
        let old = BackendManager::new(&[config("u1", "user-service", 8081)]);
        old.instances("user-service")[0].mark_failure(1);

        let new = BackendManager::rebuild(
            &[config("u1", "user-service", 8081), config("u2", "user-service", 8091)],
            Some(&old),
        );
        let states: Vec<bool> = new.instances("user-service").iter().map(|b| b.is_healthy()).collect();
        assert_eq!(states, vec![false, true]);
    }
}
