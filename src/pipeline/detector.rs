//! Large-sell detection
//!
//! Watches the normalized swap stream per token and admits sells whose
//! size lands inside the configured fraction-of-pool band. The band
//! excludes both noise (tiny sells) and panic dumps (whale exits nobody
//! defends).

use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::config::DetectionConfig;
use crate::events::{SellEvent, SellState, Side, SwapEvent};

/// One observed price point in a token's rolling history
#[derive(Debug, Clone, Copy)]
struct PricePoint {
    time: chrono::DateTime<chrono::Utc>,
    price: f64,
}

// Hard cap per token so a hot market cannot grow the window unboundedly
const MAX_HISTORY_POINTS: usize = 512;

pub struct LargeSellDetector {
    config: DetectionConfig,
    history: HashMap<String, VecDeque<PricePoint>>,
}

impl LargeSellDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    /// Inspect a swap; returns a `SellEvent` if it qualifies.
    ///
    /// The swap is recorded into the rolling price history *after* the
    /// check, so the pre-event price never includes the event itself.
    pub fn on_swap(&mut self, event: &SwapEvent) -> Option<SellEvent> {
        let sell = if event.side == Side::Sell {
            self.check_sell(event)
        } else {
            None
        };
        self.record(event);
        sell
    }

    fn check_sell(&mut self, event: &SwapEvent) -> Option<SellEvent> {
        // The snapshot carries post-swap reserves; a sell drained base from
        // the pool, so the pre-event reserve adds the sold amount back.
        let reserve_base_pre = event.pool_state.reserve_base + event.amount_base;
        if reserve_base_pre <= 0.0 {
            return None;
        }

        let fraction_of_pool = event.amount_base / reserve_base_pre;
        if fraction_of_pool < self.config.min_sell_fraction
            || fraction_of_pool > self.config.max_sell_fraction
        {
            return None;
        }

        let pre_event_price = self
            .rolling_average(&event.token_mint, event.block_time)
            .unwrap_or_else(|| {
                // No history yet: reconstruct the pre-swap spot price
                let reserve_token_pre = event.pool_state.reserve_token - event.amount_token;
                if reserve_token_pre > 0.0 {
                    reserve_base_pre / reserve_token_pre
                } else {
                    event.price_base_per_token
                }
            });

        let sell = SellEvent {
            id: SellEvent::make_id(&event.token_mint, event.slot(), event.key.tx_index),
            token_mint: event.token_mint.clone(),
            pool_address: event.pool_address.clone(),
            slot: event.slot(),
            block_time: event.block_time,
            seller_wallet: event.trader.clone(),
            sell_amount_base: event.amount_base,
            fraction_of_pool,
            pre_event_price,
            post_event_price: event.pool_state.price_base,
            window_end_slot: event.slot() + self.config.absorption_window_slots,
            state: SellState::Observing,
        };

        debug!(
            id = %sell.id,
            fraction = fraction_of_pool,
            pre_price = pre_event_price,
            post_price = sell.post_event_price,
            "Large sell admitted"
        );
        Some(sell)
    }

    /// Average price across the rolling window strictly before `at`
    fn rolling_average(
        &self,
        token_mint: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Option<f64> {
        let window_start =
            at - Duration::seconds(self.config.pre_event_price_window_secs as i64);
        let points = self.history.get(token_mint)?;
        let mut sum = 0.0;
        let mut n = 0usize;
        for p in points.iter().rev() {
            if p.time < window_start {
                break;
            }
            sum += p.price;
            n += 1;
        }
        (n > 0).then(|| sum / n as f64)
    }

    fn record(&mut self, event: &SwapEvent) {
        let points = self.history.entry(event.token_mint.clone()).or_default();
        points.push_back(PricePoint {
            time: event.block_time,
            price: event.price_base_per_token,
        });

        let cutoff = event.block_time
            - Duration::seconds(2 * self.config.pre_event_price_window_secs as i64);
        while let Some(front) = points.front() {
            if front.time < cutoff || points.len() > MAX_HISTORY_POINTS {
                points.pop_front();
            } else {
                break;
            }
        }
    }
}
