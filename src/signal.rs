//! Signal emission
//!
//! When a finalizing sell event carries a candidate whose wallet the scorer
//! currently classifies as infrastructure, a signal goes out. The signal is
//! confirmed once the validator sees stabilization, expired if the window
//! passes without it, and invalidated on shutdown.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{AbsorptionConfig, DetectionConfig, SignalConfig};
use crate::events::{
    AbsorptionCandidate, FinalizedSell, Signal, SignalStatus, Slot, ValidatedSell, WalletClass,
};
use crate::scorer::WalletScorer;

/// Signal lifecycle owner; at most one open signal per sell event
pub struct SignalBook {
    config: SignalConfig,
    detection: DetectionConfig,
    absorption: AbsorptionConfig,
    /// Open signals keyed by trigger sell-event id
    open: BTreeMap<String, Signal>,
    emitted: u64,
    confirmed: u64,
    expired: u64,
}

impl SignalBook {
    pub fn new(
        config: SignalConfig,
        detection: DetectionConfig,
        absorption: AbsorptionConfig,
    ) -> Self {
        Self {
            config,
            detection,
            absorption,
            open: BTreeMap::new(),
            emitted: 0,
            confirmed: 0,
            expired: 0,
        }
    }

    /// A window just closed: emit a signal if the deepest infra-classified
    /// absorber clears the strength bar.
    pub fn on_window_closed(
        &mut self,
        finalized: &FinalizedSell,
        scorer: &WalletScorer,
        now: DateTime<Utc>,
        slot: Slot,
    ) -> Option<Signal> {
        if self.open.contains_key(&finalized.sell.id) {
            return None;
        }

        // Candidates arrive sorted by absorption fraction descending, so
        // the first infra wallet is the strongest absorber
        let (candidate, class) = finalized.candidates.iter().find_map(|c| {
            let class = scorer.classification_of(&c.wallet)?;
            class.is_infra().then_some((c, class))
        })?;

        let strength = self.strength(candidate, class, finalized.sell.fraction_of_pool);
        if strength < self.config.min_strength {
            debug!(
                id = %finalized.sell.id,
                wallet = %candidate.wallet,
                strength,
                "Signal below strength floor, not emitted"
            );
            return None;
        }

        let signal = Signal {
            token_mint: finalized.sell.token_mint.clone(),
            pool_address: finalized.sell.pool_address.clone(),
            trigger_sell_event_id: finalized.sell.id.clone(),
            absorber_wallet: candidate.wallet.clone(),
            defended_price: finalized.sell.post_event_price,
            strength,
            stabilization_confirmed: false,
            status: SignalStatus::Active,
            created_at: now,
            created_slot: slot,
        };

        info!(
            token = %signal.token_mint,
            wallet = %signal.absorber_wallet,
            strength = signal.strength,
            "Signal emitted"
        );
        self.emitted += 1;
        self.open.insert(finalized.sell.id.clone(), signal.clone());
        Some(signal)
    }

    /// The validator ruled on the trigger sell: resolve the signal
    pub fn on_validated(&mut self, validated: &ValidatedSell) -> Option<Signal> {
        let mut signal = self.open.remove(&validated.sell.id)?;
        if validated.result.stabilized {
            signal.status = SignalStatus::Confirmed;
            signal.stabilization_confirmed = true;
            self.confirmed += 1;
        } else {
            signal.status = SignalStatus::Expired;
            self.expired += 1;
        }
        debug!(
            id = %validated.sell.id,
            status = ?signal.status,
            "Signal resolved"
        );
        Some(signal)
    }

    /// Shutdown: every open signal dies unresolved
    pub fn invalidate_all(&mut self) -> Vec<Signal> {
        let open = std::mem::take(&mut self.open);
        open.into_values()
            .map(|mut s| {
                s.status = SignalStatus::Invalidated;
                s
            })
            .collect()
    }

    pub fn open_signals(&self) -> usize {
        self.open.len()
    }

    pub fn counts(&self) -> (u64, u64, u64) {
        (self.emitted, self.confirmed, self.expired)
    }

    /// Weighted strength mixture in [0, 100]: absorption depth 40, response
    /// speed 20, classification bonus 25, sell-size significance 15.
    fn strength(
        &self,
        candidate: &AbsorptionCandidate,
        class: WalletClass,
        fraction_of_pool: f64,
    ) -> f64 {
        let absorption_part = (candidate.absorption_fraction / self.absorption.max_absorption)
            .clamp(0.0, 1.0)
            * 40.0;

        let max_latency = self.detection.max_response_latency_slots.max(1) as f64;
        let speed_part =
            (1.0 - candidate.response_latency_slots as f64 / max_latency).clamp(0.0, 1.0) * 20.0;

        let class_part = match class {
            WalletClass::DefensiveInfra => 25.0,
            WalletClass::AggressiveInfra => 20.0,
            _ => 0.0,
        };

        let size_part = (fraction_of_pool / self.detection.max_sell_fraction).clamp(0.0, 1.0)
            * 15.0;

        (absorption_part + speed_part + class_part + size_part).clamp(0.0, 100.0)
    }
}
