//! Unified time source for live and replay modes
//!
//! Every window, timeout, and decay schedule in the pipeline is phrased in
//! terms of the active [`Clock`]; no component reads wall time directly.
//! In replay mode the driver advances the clock strictly monotonically
//! through event slots, which is what makes the whole pipeline
//! deterministic.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::events::Slot;

/// Time capability handed to every component
pub trait Clock: Send + Sync {
    /// Current time according to this clock
    fn now(&self) -> DateTime<Utc>;

    /// Current chain slot according to this clock
    fn current_slot(&self) -> Slot;
}

/// Shared handle to the active clock
pub type SharedClock = Arc<dyn Clock>;

/// System time plus the latest slot observed on the feed
#[derive(Default)]
pub struct LiveClock {
    slot: AtomicU64,
}

impl LiveClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest slot seen on the feed
    pub fn observe_slot(&self, slot: Slot) {
        self.slot.fetch_max(slot, Ordering::SeqCst);
    }
}

impl Clock for LiveClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn current_slot(&self) -> Slot {
        self.slot.load(Ordering::SeqCst)
    }
}

/// Replay-driver-controlled clock; advances only forward
pub struct ReplayClock {
    slot: AtomicU64,
    unix_millis: AtomicI64,
}

impl ReplayClock {
    pub fn new() -> Self {
        Self {
            slot: AtomicU64::new(0),
            unix_millis: AtomicI64::new(0),
        }
    }

    /// Advance to the given slot and block time. Regressions are ignored:
    /// the clock is monotonic even if the driver feeds a stale timestamp.
    pub fn advance(&self, slot: Slot, block_time: DateTime<Utc>) {
        self.slot.fetch_max(slot, Ordering::SeqCst);
        self.unix_millis
            .fetch_max(block_time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.unix_millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
    }

    fn current_slot(&self) -> Slot {
        self.slot.load(Ordering::SeqCst)
    }
}
