//! Per-identity token-bucket rate limiting.
//!
//! One bucket exists per `(identity key, route id)` pair. Buckets are created
//! full on first use and dropped by the sweeper once idle.
//!
//! The sweeper marks a bucket retired under its lock before unlinking it.
//! A request that raced the sweep and holds a retired bucket looks the key
//! up again, so no token is ever taken from a bucket outside the table.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Capacity and refill rate for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimits {
    pub capacity: u32,
    pub refill_per_sec: u32,
}

impl BucketLimits {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquire {
    /// Request admitted; `remaining` whole tokens left.
    Admitted { remaining: u32 },
    /// Bucket empty; one token becomes available after `retry_after`.
    Rejected { retry_after: Duration },
}

impl Acquire {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Acquire::Admitted { .. })
    }
}

/// A token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, limits: BucketLimits, now: Instant) -> Acquire {
        let capacity = f64::from(limits.capacity);
        let rate = f64::from(limits.refill_per_sec);
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Acquire::Admitted {
                remaining: self.tokens.floor() as u32,
            }
        } else {
            let retry_after = if rate > 0.0 {
                Duration::from_secs_f64((1.0 - self.tokens) / rate)
            } else {
                Duration::MAX
            };
            Acquire::Rejected { retry_after }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    identity: String,
    route: String,
}

#[derive(Debug)]
struct BucketEntry {
    bucket: TokenBucket,
    last_seen: Instant,
    retired: bool,
}

impl BucketEntry {
    /// Take a token unless the entry has been unlinked from the table.
    fn take(&mut self, limits: BucketLimits, now: Instant) -> Option<Acquire> {
        if self.retired {
            return None;
        }
        self.last_seen = now;
        Some(self.bucket.try_acquire(limits, now))
    }
}

/// Shared bucket table.
///
/// The map only guards membership; each bucket has its own mutex so that
/// unrelated keys never contend on one lock.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<BucketKey, Arc<Mutex<BucketEntry>>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn bucket(&self, key: BucketKey, capacity: f64, now: Instant) -> Arc<Mutex<BucketEntry>> {
        if let Some(existing) = self.buckets.get(&key) {
            return existing.value().clone();
        }
        // The shard guard is dropped at the end of this statement.
        self.buckets
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(BucketEntry {
                    bucket: TokenBucket::new(capacity, now),
                    last_seen: now,
                    retired: false,
                }))
            })
            .value()
            .clone()
    }
}

/// Token-bucket limiter over an injected [`BucketStore`].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<BucketStore>,
    idle_ttl: Duration,
    max_tracked_keys: usize,
}

impl RateLimiter {
    pub fn new(store: Arc<BucketStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            max_tracked_keys: config.max_tracked_keys,
        }
    }

    /// Try to take one token from the bucket of `(key, route_id)`.
    pub fn try_acquire(&self, key: &str, route_id: &str, limits: BucketLimits) -> Acquire {
        self.try_acquire_at(key, route_id, limits, Instant::now())
    }

    pub(crate) fn try_acquire_at(
        &self,
        key: &str,
        route_id: &str,
        limits: BucketLimits,
        now: Instant,
    ) -> Acquire {
        let bucket_key = BucketKey {
            identity: key.to_string(),
            route: route_id.to_string(),
        };
        loop {
            let entry = self
                .store
                .bucket(bucket_key.clone(), f64::from(limits.capacity), now);
            let outcome = entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(limits, now);
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    /// Drop buckets idle for longer than the TTL, then evict the least
    /// recently seen ones while above `max_tracked_keys`.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let before = self.store.len();
        let ttl = self.idle_ttl;
        self.store.buckets.retain(|_, entry| {
            let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
            let keep = now.saturating_duration_since(entry.last_seen) < ttl;
            entry.retired = !keep;
            keep
        });

        let current = self.store.len();
        if current > self.max_tracked_keys {
            let mut entries: Vec<(BucketKey, Instant)> = self
                .store
                .buckets
                .iter()
                .map(|e| {
                    let seen = e.value().lock().unwrap_or_else(PoisonError::into_inner).last_seen;
                    (e.key().clone(), seen)
                })
                .collect();
            entries.sort_by_key(|(_, seen)| *seen);

            let to_remove = current - self.max_tracked_keys;
            for (key, seen) in entries.into_iter().take(to_remove) {
                // Skip buckets used since the snapshot.
                self.store.buckets.remove_if(&key, |_, entry| {
                    let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
                    entry.retired = entry.last_seen == seen;
                    entry.retired
                });
            }
            tracing::warn!(
                evicted = current.saturating_sub(self.store.len()),
                "Rate limiter at capacity, evicted oldest buckets"
            );
        }

        let removed = before.saturating_sub(self.store.len());
        metrics::record_bucket_count(self.store.len());
        removed
    }

    pub fn tracked_buckets(&self) -> usize {
        self.store.len()
    }
}
