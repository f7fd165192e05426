//! Event ordering and deduplication
//!
//! Live feeds deliver near-ordered events; a small slot-keyed buffer
//! restores `(slot, tx_index, inner_index, log_index)` order on a
//! best-effort basis. Replay is strict: any regression is a determinism
//! violation and aborts the run.

use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::{EventKey, SwapEvent};

/// Bounded memory of recently seen signatures
pub struct SignatureCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record a signature; returns false if it was already present
    pub fn insert(&mut self, signature: &str) -> bool {
        if self.seen.contains(signature) {
            return false;
        }
        self.seen.insert(signature.to_string());
        self.order.push_back(signature.to_string());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// How order violations are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingMode {
    /// Buffer by slot and emit once the watermark passes; drop regressions
    BestEffort,
    /// Any out-of-order or duplicate key is fatal
    Strict,
}

/// Slot-keyed reorder buffer
pub struct ReorderBuffer {
    mode: OrderingMode,
    depth_slots: u64,
    pending: BTreeMap<EventKey, SwapEvent>,
    max_seen_slot: u64,
    last_emitted: Option<EventKey>,
    dropped: u64,
}

impl ReorderBuffer {
    pub fn new(mode: OrderingMode, depth_slots: u64) -> Self {
        Self {
            mode,
            depth_slots,
            pending: BTreeMap::new(),
            max_seen_slot: 0,
            last_emitted: None,
            dropped: 0,
        }
    }

    /// Accept an event; returns events now safe to emit, in order.
    pub fn push(&mut self, event: SwapEvent) -> Result<Vec<SwapEvent>> {
        let key = event.key;

        if let Some(last) = self.last_emitted {
            if key <= last {
                match self.mode {
                    OrderingMode::Strict => {
                        return Err(Error::Determinism(format!(
                            "event {} arrived after {} was emitted",
                            key, last
                        )));
                    }
                    OrderingMode::BestEffort => {
                        self.dropped += 1;
                        warn!(key = %key, last = %last, "Dropping late event");
                        return Ok(Vec::new());
                    }
                }
            }
        }

        if self.pending.contains_key(&key) {
            return match self.mode {
                OrderingMode::Strict => Err(Error::Determinism(format!(
                    "duplicate ordering key {}",
                    key
                ))),
                OrderingMode::BestEffort => {
                    self.dropped += 1;
                    Ok(Vec::new())
                }
            };
        }

        self.max_seen_slot = self.max_seen_slot.max(key.slot);
        self.pending.insert(key, event);
        Ok(self.drain_ready())
    }

    /// Everything still buffered, in order. Call at EOF or shutdown.
    pub fn flush(&mut self) -> Vec<SwapEvent> {
        let mut out: Vec<SwapEvent> = Vec::with_capacity(self.pending.len());
        while let Some((key, event)) = self.pending.pop_first() {
            self.last_emitted = Some(key);
            out.push(event);
        }
        out
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn drain_ready(&mut self) -> Vec<SwapEvent> {
        // Strict mode receives pre-sorted input: emit immediately.
        let horizon = match self.mode {
            OrderingMode::Strict => self.max_seen_slot,
            OrderingMode::BestEffort => self.max_seen_slot.saturating_sub(self.depth_slots),
        };

        let mut out = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().slot > horizon {
                break;
            }
            let (key, event) = entry.remove_entry();
            self.last_emitted = Some(key);
            out.push(event);
        }
        out
    }
}
