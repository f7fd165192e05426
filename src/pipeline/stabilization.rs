//! Stabilization validation
//!
//! After an observation window closes, the swaps in the following
//! stabilization window decide whether the absorption "worked": price held
//! near the defended level, volume contracted, no fresh large sells.

use tracing::debug;

use crate::config::StabilizationConfig;
use crate::events::{
    FinalizedSell, SellState, Side, Slot, StabilizationResult, SwapEvent, ValidatedSell,
};

#[derive(Debug, Clone, Copy)]
struct PostSwap {
    price: f64,
    amount_base: f64,
    side: Side,
}

struct PendingValidation {
    finalized: FinalizedSell,
    stabilization_end_slot: Slot,
    post_swaps: Vec<PostSwap>,
}

pub struct StabilizationValidator {
    config: StabilizationConfig,
    pending: Vec<PendingValidation>,
}

impl StabilizationValidator {
    pub fn new(config: StabilizationConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
        }
    }

    /// Register a finalized sell for post-window observation
    pub fn on_finalized(&mut self, finalized: FinalizedSell) {
        let stabilization_end_slot =
            finalized.sell.window_end_slot + self.config.stabilization_window_slots;
        self.pending.push(PendingValidation {
            finalized,
            stabilization_end_slot,
            post_swaps: Vec::new(),
        });
    }

    /// Feed a swap: validations the watermark has passed evaluate first,
    /// then the swap joins every open post-window on its token.
    pub fn on_swap(&mut self, event: &SwapEvent) -> Vec<ValidatedSell> {
        let evaluated = self.evaluate_due(event.slot());

        for p in &mut self.pending {
            if p.finalized.sell.token_mint != event.token_mint {
                continue;
            }
            // A swap exactly on the window end already counted in the
            // observation window; the post interval opens strictly after
            if event.slot() <= p.finalized.sell.window_end_slot
                || event.slot() > p.stabilization_end_slot
            {
                continue;
            }
            p.post_swaps.push(PostSwap {
                price: event.price_base_per_token,
                amount_base: event.amount_base,
                side: event.side,
            });
        }

        evaluated
    }

    pub fn on_tick(&mut self, slot: Slot) -> Vec<ValidatedSell> {
        self.evaluate_due(slot)
    }

    /// End of stream: evaluate everything with the data collected so far
    pub fn on_eof(&mut self) -> Vec<ValidatedSell> {
        let pending = std::mem::take(&mut self.pending);
        pending.into_iter().map(|p| Self::evaluate(&self.config, p)).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn evaluate_due(&mut self, watermark_slot: Slot) -> Vec<ValidatedSell> {
        let mut due = Vec::new();
        let mut keep = Vec::with_capacity(self.pending.len());
        for p in self.pending.drain(..) {
            if p.stabilization_end_slot < watermark_slot {
                due.push(p);
            } else {
                keep.push(p);
            }
        }
        self.pending = keep;
        due.into_iter().map(|p| Self::evaluate(&self.config, p)).collect()
    }

    fn evaluate(config: &StabilizationConfig, p: PendingValidation) -> ValidatedSell {
        let mut sell = p.finalized.sell;
        let result = Self::analyze(config, &sell.id, sell.sell_amount_base,
            sell.pre_event_price, sell.post_event_price,
            p.finalized.window_volume_base, &p.post_swaps);

        let next = if result.stabilized {
            SellState::Validated
        } else {
            SellState::Invalidated
        };
        // Finalized sells are always `analyzing` here
        let _ = sell.transition(next);

        debug!(
            id = %sell.id,
            stabilized = result.stabilized,
            confidence = result.confidence_score,
            "Stabilization evaluated"
        );

        ValidatedSell {
            sell,
            candidates: p.finalized.candidates,
            result,
        }
    }

    fn analyze(
        config: &StabilizationConfig,
        event_id: &str,
        sell_amount_base: f64,
        pre_event_price: f64,
        post_event_price: f64,
        event_volume: f64,
        post_swaps: &[PostSwap],
    ) -> StabilizationResult {
        // No post-window activity: no evidence, no claim
        if post_swaps.is_empty() || pre_event_price <= 0.0 || post_event_price <= 0.0 {
            return StabilizationResult {
                event_id: event_id.to_string(),
                stabilized: false,
                price_recovery_pct: 0.0,
                made_new_low: false,
                volume_contraction_pct: 0.0,
                defense_level: post_event_price,
                defense_hold_slots: 0,
                defense_held: false,
                additional_large_sells: 0,
                confidence_score: 0.0,
            };
        }

        let n = post_swaps.len() as f64;
        let avg_post: f64 = post_swaps.iter().map(|s| s.price).sum::<f64>() / n;
        let min_post = post_swaps
            .iter()
            .map(|s| s.price)
            .fold(f64::INFINITY, f64::min);

        let price_recovery_pct = (avg_post - post_event_price) / pre_event_price * 100.0;
        let made_new_low = min_post < post_event_price * (1.0 - config.new_low_tolerance);

        let post_volume: f64 = post_swaps.iter().map(|s| s.amount_base).sum();
        let volume_contraction_pct = if event_volume > 0.0 {
            ((event_volume - post_volume) / event_volume * 100.0).max(0.0)
        } else {
            0.0
        };

        let defense_level = post_event_price;
        let band = 0.95 * defense_level;
        let defense_hold_slots = post_swaps.iter().filter(|s| s.price >= band).count() as u64;
        let defense_held = post_swaps.iter().all(|s| s.price >= band);

        let additional_large_sells = post_swaps
            .iter()
            .filter(|s| s.side == Side::Sell && s.amount_base >= 0.5 * sell_amount_base)
            .count() as u32;

        let mut confidence: f64 = 50.0;
        confidence += if price_recovery_pct > 0.0 {
            (2.0 * price_recovery_pct).min(20.0)
        } else {
            price_recovery_pct.max(-20.0)
        };
        if !made_new_low {
            confidence += 15.0;
        }
        confidence += (volume_contraction_pct / 4.0).min(15.0);
        if defense_held {
            confidence += 20.0;
        }
        confidence -= 10.0 * additional_large_sells as f64;
        let confidence_score = confidence.clamp(0.0, 100.0);

        let stabilized = !made_new_low
            && volume_contraction_pct >= config.min_contraction_pct
            && price_recovery_pct >= -config.max_price_drop_pct
            && defense_held
            && additional_large_sells == 0
            && confidence_score >= 60.0;

        StabilizationResult {
            event_id: event_id.to_string(),
            stabilized,
            price_recovery_pct,
            made_new_low,
            volume_contraction_pct,
            defense_level,
            defense_hold_slots,
            defense_held,
            additional_large_sells,
            confidence_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AbsorptionCandidate, EventKey, PoolStateSnapshot, SellEvent};
    use crate::ingest::instruction::DexProgram;
    use chrono::{TimeZone, Utc};

    fn config() -> StabilizationConfig {
        StabilizationConfig {
            stabilization_window_slots: 40,
            max_price_drop_pct: 5.0,
            min_contraction_pct: 20.0,
            new_low_tolerance: 0.05,
        }
    }

    fn finalized(window_volume: f64) -> FinalizedSell {
        FinalizedSell {
            sell: SellEvent {
                id: "mint:10:0".into(),
                token_mint: "mint".into(),
                pool_address: "pool".into(),
                slot: 10,
                block_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                seller_wallet: "seller".into(),
                sell_amount_base: 2.0,
                fraction_of_pool: 0.02,
                pre_event_price: 0.01,
                post_event_price: 0.0096,
                window_end_slot: 20,
                state: SellState::Analyzing,
            },
            candidates: vec![AbsorptionCandidate {
                event_id: "mint:10:0".into(),
                wallet: "W_A".into(),
                token_mint: "mint".into(),
                total_buy_base: 1.2,
                buy_count: 2,
                absorption_fraction: 0.6,
                response_latency_slots: 1,
                avg_price_impact: 1.0,
                first_buy_slot: 11,
                last_buy_slot: 12,
                bought_during_dip: true,
            }],
            total_candidates: 1,
            window_volume_base: window_volume,
        }
    }

    fn swap(slot: u64, price: f64, amount: f64, side: Side) -> SwapEvent {
        SwapEvent {
            key: EventKey::new(slot, 0, 0, 0),
            signature: format!("s-{}-{}", slot, price),
            block_time: Utc.timestamp_opt(1_700_000_000 + slot as i64, 0).unwrap(),
            program: DexProgram::Raydium,
            pool_address: "pool".into(),
            token_mint: "mint".into(),
            base_mint: "base".into(),
            trader: "t".into(),
            side,
            amount_base: amount,
            amount_token: amount / price,
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
    fn test_stable_window_validates() {
        let mut v = StabilizationValidator::new(config());
        // Observation window saw 4.0 of volume
        v.on_finalized(finalized(4.0));

        // Post-window: prices within 2% of the defended level, volume halves
        for slot in [25, 35, 45, 55] {
            assert!(v.on_swap(&swap(slot, 0.00965, 0.5, Side::Buy)).is_empty());
        }

        // Watermark passes the stabilization end (60)
        let out = v.on_swap(&swap(61, 0.0097, 0.1, Side::Buy));
        assert_eq!(out.len(), 1);
        let validated = &out[0];
        assert!(validated.result.stabilized);
        assert_eq!(validated.sell.state, SellState::Validated);
        assert!(!validated.result.made_new_low);
        assert!(validated.result.defense_held);
        assert_eq!(validated.result.additional_large_sells, 0);
        assert!((validated.result.volume_contraction_pct - 50.0).abs() < 1e-9);
        assert!(validated.result.confidence_score >= 60.0);
    }

    #[test]
    fn test_new_low_invalidates() {
        let mut v = StabilizationValidator::new(config());
        v.on_finalized(finalized(4.0));

        // A print at 90% of the defended level breaks both the new-low
        // tolerance and the 5% defense band
        v.on_swap(&swap(25, 0.0096 * 0.9, 0.5, Side::Buy));
        v.on_swap(&swap(30, 0.0096, 0.5, Side::Buy));

        let out = v.on_tick(100);
        assert_eq!(out.len(), 1);
        assert!(!out[0].result.stabilized);
        assert!(out[0].result.made_new_low);
        assert!(!out[0].result.defense_held);
        assert_eq!(out[0].sell.state, SellState::Invalidated);
    }

    #[test]
    fn test_additional_large_sell_invalidates() {
        let mut v = StabilizationValidator::new(config());
        v.on_finalized(finalized(4.0));

        v.on_swap(&swap(25, 0.0096, 0.5, Side::Buy));
        // A fresh sell at 75% of the trigger size
        v.on_swap(&swap(30, 0.0096, 1.5, Side::Sell));

        let out = v.on_tick(100);
        assert!(!out[0].result.stabilized);
        assert_eq!(out[0].result.additional_large_sells, 1);
    }

    #[test]
    fn test_window_end_boundary_swap_excluded() {
        // The trigger's window ends at slot 20
        let mut v = StabilizationValidator::new(config());
        v.on_finalized(finalized(4.0));

        // Exactly on the window end: belongs to the observation window,
        // never to the post interval
        v.on_swap(&swap(20, 0.0096, 1.0, Side::Buy));
        let out = v.on_eof();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result.confidence_score, 0.0);
        assert!(!out[0].result.stabilized);

        // One slot later it counts
        let mut v = StabilizationValidator::new(config());
        v.on_finalized(finalized(4.0));
        v.on_swap(&swap(21, 0.0096, 1.0, Side::Buy));
        let out = v.on_eof();
        assert_eq!(out[0].result.defense_hold_slots, 1);
    }

    #[test]
    fn test_empty_post_window_invalidates() {
        let mut v = StabilizationValidator::new(config());
        v.on_finalized(finalized(4.0));

        let out = v.on_eof();
        assert_eq!(out.len(), 1);
        assert!(!out[0].result.stabilized);
        assert_eq!(out[0].result.confidence_score, 0.0);
        assert_eq!(out[0].sell.state, SellState::Invalidated);
    }

    #[test]
    fn test_insufficient_contraction_invalidates() {
        let mut v = StabilizationValidator::new(config());
        v.on_finalized(finalized(4.0));

        // Volume does not contract: 4.0 in the post window too
        for slot in [25, 35, 45, 55] {
            v.on_swap(&swap(slot, 0.00965, 1.0, Side::Buy));
        }

        let out = v.on_tick(100);
        assert!(!out[0].result.stabilized);
        assert!(out[0].result.volume_contraction_pct < 20.0);
    }

    #[test]
    fn test_confidence_formula() {
        // Direct check of the scoring arithmetic
        let result = StabilizationValidator::analyze(
            &config(),
            "id",
            2.0,
            0.01,
            0.0096,
            4.0,
            &[
                PostSwap { price: 0.0098, amount_base: 1.0, side: Side::Buy },
                PostSwap { price: 0.0098, amount_base: 1.0, side: Side::Buy },
            ],
        );
        // recovery = (0.0098 - 0.0096)/0.01*100 = 2.0 -> +4
        assert!((result.price_recovery_pct - 2.0).abs() < 1e-9);
        // contraction = (4-2)/4*100 = 50 -> +12.5, no new low +15, held +20
        let expected: f64 = 50.0 + 4.0 + 15.0 + 12.5 + 20.0;
        assert!((result.confidence_score - expected.min(100.0)).abs() < 1e-9);
        assert!(result.stabilized);
    }
}
