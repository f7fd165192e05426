//! Absorption analysis
//!
//! Each admitted sell opens a bounded observation window. Buys on the same
//! token inside the window aggregate per buyer into absorption candidates.
//! Windows close on the slot watermark, not wall time, so live and replay
//! behave identically.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::{AbsorptionConfig, DetectionConfig};
use crate::events::{
    AbsorptionCandidate, CandidateMap, FinalizedSell, SellEvent, SellState, Side, Slot, SwapEvent,
};

struct OpenWindow {
    sell: SellEvent,
    candidates: CandidateMap,
    window_volume_base: f64,
    // Volume-weighted buy price numerators per wallet, for the dip check
    buy_value: BTreeMap<String, f64>,
    // Sum of per-buy price impacts per wallet, averaged at close
    impact_sum: BTreeMap<String, f64>,
}

pub struct AbsorptionAnalyzer {
    detection: DetectionConfig,
    absorption: AbsorptionConfig,
    windows: Vec<OpenWindow>,
    late_buys_dropped: u64,
    overfull_candidates_dropped: u64,
}

impl AbsorptionAnalyzer {
    pub fn new(detection: DetectionConfig, absorption: AbsorptionConfig) -> Self {
        Self {
            detection,
            absorption,
            windows: Vec::new(),
            late_buys_dropped: 0,
            overfull_candidates_dropped: 0,
        }
    }

    /// Open an observation window for an admitted sell.
    ///
    /// The triggering sell itself seeds the window volume.
    pub fn on_sell(&mut self, sell: SellEvent) {
        debug!(id = %sell.id, window_end = sell.window_end_slot, "Window opened");
        self.windows.push(OpenWindow {
            window_volume_base: sell.sell_amount_base,
            sell,
            candidates: BTreeMap::new(),
            buy_value: BTreeMap::new(),
            impact_sum: BTreeMap::new(),
        });
    }

    /// Feed a swap; windows the watermark has passed close first, then the
    /// swap attributes to every remaining window on its token.
    pub fn on_swap(&mut self, event: &SwapEvent) -> Vec<FinalizedSell> {
        let closed = self.close_due(event.slot());

        for window in &mut self.windows {
            if window.sell.token_mint != event.token_mint {
                continue;
            }
            // Windows open after their trigger is processed, so anything
            // that reaches one is subsequent in stream order; same-slot
            // responses attribute with latency zero
            if event.slot() > window.sell.window_end_slot {
                continue;
            }

            window.window_volume_base += event.amount_base;

            if event.side != Side::Buy {
                continue;
            }

            let latency = event.slot().saturating_sub(window.sell.slot);
            if latency > self.detection.max_response_latency_slots {
                self.late_buys_dropped += 1;
                continue;
            }

            let sell = &window.sell;
            let price_impact_pct = if sell.post_event_price > 0.0 {
                (event.price_base_per_token - sell.post_event_price) / sell.post_event_price
                    * 100.0
            } else {
                0.0
            };

            let candidate = window
                .candidates
                .entry(event.trader.clone())
                .or_insert_with(|| AbsorptionCandidate {
                    event_id: sell.id.clone(),
                    wallet: event.trader.clone(),
                    token_mint: sell.token_mint.clone(),
                    total_buy_base: 0.0,
                    buy_count: 0,
                    absorption_fraction: 0.0,
                    response_latency_slots: latency,
                    avg_price_impact: 0.0,
                    first_buy_slot: event.slot(),
                    last_buy_slot: event.slot(),
                    bought_during_dip: false,
                });

            candidate.total_buy_base += event.amount_base;
            candidate.buy_count += 1;
            candidate.absorption_fraction = candidate.total_buy_base / sell.sell_amount_base;
            candidate.last_buy_slot = event.slot();

            *window.buy_value.entry(event.trader.clone()).or_insert(0.0) +=
                event.amount_base * event.price_base_per_token;
            *window.impact_sum.entry(event.trader.clone()).or_insert(0.0) += price_impact_pct;
        }

        closed
    }

    /// Close every window whose end the watermark has passed
    pub fn on_tick(&mut self, slot: Slot) -> Vec<FinalizedSell> {
        self.close_due(slot)
    }

    /// End of stream: every remaining window finalizes with what it has
    pub fn on_eof(&mut self) -> Vec<FinalizedSell> {
        let mut remaining = std::mem::take(&mut self.windows);
        remaining
            .drain(..)
            .map(|w| self.finalize(w))
            .collect()
    }

    /// Shutdown: abandon in-flight windows as invalidated
    pub fn on_cancel(&mut self) -> Vec<SellEvent> {
        let mut remaining = std::mem::take(&mut self.windows);
        remaining
            .drain(..)
            .filter_map(|mut w| {
                w.sell.transition(SellState::Analyzing).ok()?;
                w.sell.transition(SellState::Invalidated).ok()?;
                Some(w.sell)
            })
            .collect()
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn late_buys_dropped(&self) -> u64 {
        self.late_buys_dropped
    }

    /// Candidates rejected for absorbing more than the sell itself
    pub fn overfull_candidates_dropped(&self) -> u64 {
        self.overfull_candidates_dropped
    }

    fn close_due(&mut self, watermark_slot: Slot) -> Vec<FinalizedSell> {
        let mut due = Vec::new();
        let mut keep = Vec::with_capacity(self.windows.len());
        for window in self.windows.drain(..) {
            if window.sell.window_end_slot < watermark_slot {
                due.push(window);
            } else {
                keep.push(window);
            }
        }
        self.windows = keep;
        due.into_iter().map(|w| self.finalize(w)).collect()
    }

    fn finalize(&mut self, mut window: OpenWindow) -> FinalizedSell {
        if window.sell.transition(SellState::Analyzing).is_err() {
            warn!(id = %window.sell.id, "Window already finalized");
        }

        let total_candidates = window.candidates.len();
        let sell = window.sell.clone();

        let mut meaningful: Vec<AbsorptionCandidate> = window
            .candidates
            .into_iter()
            .filter_map(|(wallet, mut candidate)| {
                // Volume-weighted average buy price vs the pre-event price
                let vwap = window
                    .buy_value
                    .get(&wallet)
                    .map(|v| v / candidate.total_buy_base.max(f64::MIN_POSITIVE))
                    .unwrap_or(f64::MAX);
                candidate.bought_during_dip = vwap < sell.pre_event_price;
                candidate.avg_price_impact = window
                    .impact_sum
                    .get(&wallet)
                    .map(|s| s / candidate.buy_count.max(1) as f64)
                    .unwrap_or(0.0);

                if candidate.absorption_fraction > 1.0 {
                    // Impossible balance movement: more bought back than sold
                    warn!(
                        wallet = %wallet,
                        fraction = candidate.absorption_fraction,
                        "Candidate absorbing more than the sell, dropped"
                    );
                    self.overfull_candidates_dropped += 1;
                    return None;
                }

                let in_band = candidate.absorption_fraction >= self.absorption.min_absorption
                    && candidate.absorption_fraction <= self.absorption.max_absorption;
                (in_band && candidate.bought_during_dip).then_some(candidate)
            })
            .collect();

        // Deterministic forwarding order: deepest absorber first
        meaningful.sort_by(|a, b| {
            b.absorption_fraction
                .partial_cmp(&a.absorption_fraction)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.wallet.cmp(&b.wallet))
        });

        debug!(
            id = %sell.id,
            candidates = total_candidates,
            meaningful = meaningful.len(),
            "Window finalized"
        );

        FinalizedSell {
            sell: window.sell,
            candidates: meaningful,
            total_candidates,
            window_volume_base: window.window_volume_base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKey, PoolStateSnapshot};
    use crate::ingest::instruction::DexProgram;
    use chrono::{TimeZone, Utc};

    fn analyzer() -> AbsorptionAnalyzer {
        AbsorptionAnalyzer::new(
            DetectionConfig {
                min_sell_fraction: 0.01,
                max_sell_fraction: 0.15,
                absorption_window_slots: 10,
                max_response_latency_slots: 8,
                pre_event_price_window_secs: 30,
                sell_retention_slots: 2000,
            },
            AbsorptionConfig {
                min_absorption: 0.25,
                max_absorption: 1.0,
            },
        )
    }

    fn sell(slot: u64) -> SellEvent {
        SellEvent {
            id: SellEvent::make_id("mint", slot, 0),
            token_mint: "mint".into(),
            pool_address: "pool".into(),
            slot,
            block_time: Utc.timestamp_opt(1_700_000_000 + slot as i64, 0).unwrap(),
            seller_wallet: "seller".into(),
            sell_amount_base: 2.0,
            fraction_of_pool: 0.02,
            pre_event_price: 0.01,
            post_event_price: 0.0096,
            window_end_slot: slot + 10,
            state: SellState::Observing,
        }
    }

    fn buy(slot: u64, trader: &str, amount_base: f64, price: f64) -> SwapEvent {
        SwapEvent {
            key: EventKey::new(slot, 1, 0, 0),
            signature: format!("buy-{}-{}", slot, trader),
            block_time: Utc.timestamp_opt(1_700_000_000 + slot as i64, 0).unwrap(),
            program: DexProgram::Raydium,
            pool_address: "pool".into(),
            token_mint: "mint".into(),
            base_mint: "base".into(),
            trader: trader.into(),
            side: Side::Buy,
            amount_base,
            amount_token: amount_base / price,
            price_base_per_token: price,
            pool_state: PoolStateSnapshot {
                slot,
                pool_address: "pool".into(),
                reserve_base: 100.0,
                reserve_token: 100.0 / price,
                price_base: price,
                liquidity_usd: None,
            },
        }
    }

    #[test]
    fn test_single_absorber_aggregates() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        a.on_swap(&buy(11, "W_A", 0.6, 0.0097));
        a.on_swap(&buy(12, "W_A", 0.6, 0.0098));

        // Slot 21 passes the window end (20) and closes it
        let finalized = a.on_swap(&buy(21, "other", 0.1, 0.0099));
        assert_eq!(finalized.len(), 1);
        let f = &finalized[0];
        assert_eq!(f.sell.state, SellState::Analyzing);
        assert_eq!(f.candidates.len(), 1);

        let c = &f.candidates[0];
        assert_eq!(c.wallet, "W_A");
        assert_eq!(c.buy_count, 2);
        assert!((c.absorption_fraction - 0.6).abs() < 1e-9);
        assert_eq!(c.response_latency_slots, 1);
        assert_eq!(c.first_buy_slot, 11);
        assert_eq!(c.last_buy_slot, 12);
        assert!(c.bought_during_dip);
        // Trigger sell (2.0) plus two buys (1.2)
        assert!((f.window_volume_base - 3.2).abs() < 1e-9);
    }

    #[test]
    fn test_buy_above_pre_price_not_meaningful() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        a.on_swap(&buy(11, "W_A", 1.2, 0.0110)); // above pre_event_price

        let finalized = a.on_tick(25);
        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].candidates.is_empty());
        assert_eq!(finalized[0].total_candidates, 1);
    }

    #[test]
    fn test_latency_bound_drops_buys() {
        let mut a = analyzer();
        let mut s = sell(10);
        s.window_end_slot = 30; // window longer than the latency bound
        a.on_sell(s);
        a.on_swap(&buy(19, "W_A", 1.2, 0.0097)); // latency 9 > 8

        let finalized = a.on_tick(40);
        assert!(finalized[0].candidates.is_empty());
        assert_eq!(a.late_buys_dropped(), 1);
    }

    #[test]
    fn test_buy_after_window_close_dropped() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        let finalized = a.on_tick(25);
        assert_eq!(finalized.len(), 1);

        // Nothing to attribute to any more
        let more = a.on_swap(&buy(26, "W_A", 1.2, 0.0097));
        assert!(more.is_empty());
        assert_eq!(a.open_windows(), 0);
    }

    #[test]
    fn test_overlapping_windows_attribute_independently() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        let mut second = sell(14);
        second.id = SellEvent::make_id("mint", 14, 0);
        second.slot = 14;
        second.window_end_slot = 24;
        a.on_sell(second);

        // One buy lands inside both windows
        a.on_swap(&buy(16, "W_B", 1.0, 0.0097));

        let finalized = a.on_eof();
        assert_eq!(finalized.len(), 2);
        for f in &finalized {
            assert_eq!(f.candidates.len(), 1);
            assert_eq!(f.candidates[0].wallet, "W_B");
            assert!((f.candidates[0].absorption_fraction - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_overfull_candidate_dropped() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        a.on_swap(&buy(11, "W_A", 2.6, 0.0097)); // 130% of the sell

        let finalized = a.on_tick(25);
        assert!(finalized[0].candidates.is_empty());
    }

    #[test]
    fn test_candidates_sorted_by_fraction_desc() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        a.on_swap(&buy(11, "W_small", 0.6, 0.0097));
        a.on_swap(&buy(12, "W_big", 1.6, 0.0097));

        let finalized = a.on_tick(25);
        let wallets: Vec<&str> = finalized[0]
            .candidates
            .iter()
            .map(|c| c.wallet.as_str())
            .collect();
        assert_eq!(wallets, vec!["W_big", "W_small"]);
    }

    #[test]
    fn test_cancel_invalidates_open_windows() {
        let mut a = analyzer();
        a.on_sell(sell(10));
        let invalidated = a.on_cancel();
        assert_eq!(invalidated.len(), 1);
        assert_eq!(invalidated[0].state, SellState::Invalidated);
        assert_eq!(a.open_windows(), 0);
    }
}
