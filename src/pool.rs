//! Pool state store
//!
//! Latest known reserves per pool. Written only by the normalizer task,
//! read on demand by the detector, validator, and fill simulator. Readers
//! get owned snapshots, so they observe either the pre-update or the
//! post-update state, never a torn one. LRU-bounded; an evicted pool
//! rebuilds on its next swap.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::events::{PoolStateSnapshot, Slot};

struct Inner {
    map: HashMap<String, PoolStateSnapshot>,
    // Access order, least recent first
    order: VecDeque<String>,
    evictions: u64,
}

/// Bounded single-writer many-reader snapshot store
pub struct PoolStateStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl PoolStateStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                evictions: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record the latest snapshot for a pool
    pub fn record(&self, snapshot: PoolStateSnapshot) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let pool = snapshot.pool_address.clone();

        if inner.map.insert(pool.clone(), snapshot).is_some() {
            if let Some(pos) = inner.order.iter().position(|p| *p == pool) {
                inner.order.remove(pos);
            }
        }
        inner.order.push_back(pool);

        while inner.map.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
                inner.evictions += 1;
            }
        }
    }

    /// Latest snapshot for a pool, if known
    pub fn latest(&self, pool_address: &str) -> Option<PoolStateSnapshot> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.map.get(pool_address).cloned()
    }

    /// Latest snapshot no older than `max_age_slots` relative to `now_slot`.
    /// Stale-tolerant consumers call `latest` instead and decide themselves.
    pub fn fresh(
        &self,
        pool_address: &str,
        now_slot: Slot,
        max_age_slots: Slot,
    ) -> Option<PoolStateSnapshot> {
        self.latest(pool_address)
            .filter(|s| s.age_slots(now_slot) <= max_age_slots)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.evictions
    }
}
