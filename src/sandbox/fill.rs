//! Deterministic fill simulation
//!
//! Models execution latency, quote staleness, routing failures, partial
//! fills, slippage, and fees against recorded pool history. Failures are
//! values, not errors: the trading loop counts them and moves on. Given
//! the same seed and the same history, the outputs are bit-identical.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::{ExecutionConfig, SlippageModel};
use crate::events::{PoolStateSnapshot, Side, Slot};
use crate::sandbox::rng::Lcg32;

/// Per-pool snapshot history for execution-time lookups
#[derive(Default)]
pub struct PoolHistory {
    by_pool: HashMap<String, BTreeMap<Slot, PoolStateSnapshot>>,
}

impl PoolHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, snapshot: PoolStateSnapshot) {
        self.by_pool
            .entry(snapshot.pool_address.clone())
            .or_default()
            .insert(snapshot.slot, snapshot);
    }

    /// Snapshot at the greatest recorded slot at or before `slot`
    pub fn at_or_before(&self, pool_address: &str, slot: Slot) -> Option<&PoolStateSnapshot> {
        self.by_pool
            .get(pool_address)?
            .range(..=slot)
            .next_back()
            .map(|(_, snapshot)| snapshot)
    }

    pub fn pools(&self) -> usize {
        self.by_pool.len()
    }
}

/// Why a simulated order did not fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillFailure {
    QuoteStale,
    RouteFail,
    SlippageExceeded,
}

impl std::fmt::Display for FillFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillFailure::QuoteStale => write!(f, "quote_stale"),
            FillFailure::RouteFail => write!(f, "route_fail"),
            FillFailure::SlippageExceeded => write!(f, "slippage_exceeded"),
        }
    }
}

/// A successful simulated execution
#[derive(Debug, Clone, Serialize)]
pub struct Fill {
    pub execution_slot: Slot,
    pub fill_price: f64,
    pub slippage_bps: f64,
    pub fees_base: f64,
    /// May be below the requested amount on a partial fill
    pub executed_amount_base: f64,
    pub partial: bool,
}

pub struct FillSimulator {
    config: ExecutionConfig,
    rng: Lcg32,
}

impl FillSimulator {
    /// `config` should already be resolved through the mode presets
    pub fn new(config: ExecutionConfig, seed: u32) -> Self {
        Self {
            config,
            rng: Lcg32::new(seed),
        }
    }

    /// Simulate one order against recorded history
    pub fn fill(
        &mut self,
        side: Side,
        amount_base: f64,
        pool_address: &str,
        current_slot: Slot,
        history: &PoolHistory,
    ) -> Result<Fill, FillFailure> {
        let execution_slot = current_slot + self.config.latency_slots;

        let snapshot = history
            .at_or_before(pool_address, execution_slot)
            .ok_or(FillFailure::QuoteStale)?;

        // All three uniforms are always drawn, in a fixed order, so the
        // stream stays aligned whatever failure branch is taken below
        let stale_draw = self.rng.next_f64();
        let route_draw = self.rng.next_f64();
        let partial_draw = self.rng.next_f64();

        if stale_draw < self.config.quote_stale_prob {
            return Err(FillFailure::QuoteStale);
        }
        if route_draw < self.config.route_fail_prob {
            return Err(FillFailure::RouteFail);
        }

        let partial = partial_draw < self.config.partial_fill_prob;
        let executed_amount_base = if partial {
            amount_base * self.config.partial_fill_ratio
        } else {
            amount_base
        };

        let slippage_bps = self.slippage_bps(side, executed_amount_base, snapshot);
        if slippage_bps.abs() > 2.0 * self.config.slippage_bps {
            return Err(FillFailure::SlippageExceeded);
        }

        let fees_base =
            executed_amount_base * self.config.lp_fee_bps / 10_000.0 + self.config.priority_fee;
        let fill_price = snapshot.price_base * (1.0 + slippage_bps / 10_000.0);

        Ok(Fill {
            execution_slot,
            fill_price,
            slippage_bps,
            fees_base,
            executed_amount_base,
            partial,
        })
    }

    /// Signed slippage in bps: positive worsens a buy, negative a sell
    fn slippage_bps(&self, side: Side, amount_base: f64, snapshot: &PoolStateSnapshot) -> f64 {
        match self.config.slippage_model {
            SlippageModel::None => 0.0,
            SlippageModel::Constant => match side {
                Side::Buy => self.config.slippage_bps,
                Side::Sell => -self.config.slippage_bps,
            },
            SlippageModel::Reserves => {
                let spot = snapshot.price_base;
                let rb = snapshot.reserve_base;
                let rt = snapshot.reserve_token;
                let k = rb * rt;
                if spot <= 0.0 || rb <= 0.0 || rt <= 0.0 || amount_base <= 0.0 {
                    return 0.0;
                }
                match side {
                    Side::Buy => {
                        // Base in, token out along the constant product
                        let rb_next = rb + amount_base;
                        let token_out = rt - k / rb_next;
                        if token_out <= 0.0 {
                            return f64::INFINITY;
                        }
                        let execution_price = amount_base / token_out;
                        (execution_price / spot - 1.0) * 10_000.0
                    }
                    Side::Sell => {
                        // Token in (valued at spot), base out
                        let token_in = amount_base / spot;
                        let rt_next = rt + token_in;
                        let base_out = rb - k / rt_next;
                        if base_out <= 0.0 || token_in <= 0.0 {
                            return f64::NEG_INFINITY;
                        }
                        let execution_price = base_out / token_in;
                        (execution_price / spot - 1.0) * 10_000.0
                    }
                }
            }
        }
    }
}
