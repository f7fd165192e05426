//! Canonical event and analytics data model
//!
//! Everything flowing between pipeline stages is a plain value type with
//! explicit ownership. `SwapEvent`s are immutable once emitted by the
//! normalizer; each `SellEvent` owns its candidate map until finalization,
//! after which the scorer consumes a snapshot. No reverse pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ingest::instruction::DexProgram;

/// Chain slot index, the canonical monotonic clock
pub type Slot = u64;

/// Total ordering key for swap events within a run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventKey {
    pub slot: Slot,
    pub tx_index: u32,
    pub inner_index: u32,
    pub log_index: u32,
}

impl EventKey {
    pub fn new(slot: Slot, tx_index: u32, inner_index: u32, log_index: u32) -> Self {
        Self {
            slot,
            tx_index,
            inner_index,
            log_index,
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.slot, self.tx_index, self.inner_index, self.log_index
        )
    }
}

/// Swap direction relative to the tracked token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Last-known pool reserves and derived price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStateSnapshot {
    pub slot: Slot,
    pub pool_address: String,
    pub reserve_base: f64,
    pub reserve_token: f64,
    /// Constant-product spot price: reserve_base / reserve_token
    pub price_base: f64,
    pub liquidity_usd: Option<f64>,
}

impl PoolStateSnapshot {
    /// Validate the reserve invariants: both reserves positive, price consistent
    pub fn validate(&self) -> crate::Result<()> {
        if self.reserve_base <= 0.0 || self.reserve_token <= 0.0 {
            return Err(crate::Error::InvalidPoolState {
                pool: self.pool_address.clone(),
                reason: format!(
                    "non-positive reserves: base={} token={}",
                    self.reserve_base, self.reserve_token
                ),
            });
        }
        let derived = self.reserve_base / self.reserve_token;
        if !(self.price_base.is_finite() && derived.is_finite()) {
            return Err(crate::Error::InvalidPoolState {
                pool: self.pool_address.clone(),
                reason: "non-finite price".into(),
            });
        }
        // Tolerate rounding from the recording path
        if (self.price_base - derived).abs() > derived.abs() * 1e-6 {
            return Err(crate::Error::InvalidPoolState {
                pool: self.pool_address.clone(),
                reason: format!(
                    "price {} inconsistent with reserves ({})",
                    self.price_base, derived
                ),
            });
        }
        Ok(())
    }

    /// Staleness in slots relative to the given slot
    pub fn age_slots(&self, now_slot: Slot) -> Slot {
        now_slot.saturating_sub(self.slot)
    }
}

/// The canonical unit flowing through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub key: EventKey,
    pub signature: String,
    pub block_time: DateTime<Utc>,
    pub program: DexProgram,
    pub pool_address: String,
    pub token_mint: String,
    pub base_mint: String,
    pub trader: String,
    pub side: Side,
    /// Base-currency leg of the swap (absolute)
    pub amount_base: f64,
    /// Token leg of the swap (absolute)
    pub amount_token: f64,
    /// Derived execution price in base per token
    pub price_base_per_token: f64,
    /// Pool reserves at the event
    pub pool_state: PoolStateSnapshot,
}

impl SwapEvent {
    pub fn slot(&self) -> Slot {
        self.key.slot
    }
}

/// Lifecycle of a detected large sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellState {
    Observing,
    Analyzing,
    Validated,
    Invalidated,
}

/// A large sell admitted by the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellEvent {
    /// Deterministic id: "{token_mint}:{slot}:{tx_index}"
    pub id: String,
    pub token_mint: String,
    pub pool_address: String,
    pub slot: Slot,
    pub block_time: DateTime<Utc>,
    pub seller_wallet: String,
    pub sell_amount_base: f64,
    /// sell_amount_base / reserve_base at the event
    pub fraction_of_pool: f64,
    /// Rolling average price strictly before the event
    pub pre_event_price: f64,
    /// Pool price immediately after the sell (the defended level)
    pub post_event_price: f64,
    pub window_end_slot: Slot,
    pub state: SellState,
}

impl SellEvent {
    pub fn make_id(token_mint: &str, slot: Slot, tx_index: u32) -> String {
        format!("{}:{}:{}", token_mint, slot, tx_index)
    }

    /// Forward-only state transition; out-of-order transitions are rejected
    pub fn transition(&mut self, next: SellState) -> crate::Result<()> {
        use SellState::*;
        let ok = matches!(
            (self.state, next),
            (Observing, Analyzing) | (Analyzing, Validated) | (Analyzing, Invalidated)
        );
        if !ok {
            return Err(crate::Error::Internal(format!(
                "illegal sell state transition {:?} -> {:?} for {}",
                self.state, next, self.id
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// Per-(sell event, buyer) absorption evidence collected inside the window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorptionCandidate {
    pub event_id: String,
    pub wallet: String,
    pub token_mint: String,
    pub total_buy_base: f64,
    pub buy_count: u32,
    /// total_buy_base / sell_amount_base; non-decreasing until window close
    pub absorption_fraction: f64,
    /// Slots between the sell and the first buy
    pub response_latency_slots: Slot,
    /// Mean price move of the candidate's buys vs the defended level, percent
    pub avg_price_impact: f64,
    pub first_buy_slot: Slot,
    pub last_buy_slot: Slot,
    /// Volume-weighted buy price was below the pre-event price
    pub bought_during_dip: bool,
}

/// Post-window price/volume verdict for a sell event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationResult {
    pub event_id: String,
    pub stabilized: bool,
    /// (avg post price - post event price) / pre event price, percent
    pub price_recovery_pct: f64,
    pub made_new_low: bool,
    /// (event volume - post volume) / event volume, percent, floored at 0
    pub volume_contraction_pct: f64,
    /// The defended level: price immediately after the triggering sell
    pub defense_level: f64,
    /// Post-window swaps priced at or above 95% of the defense level
    pub defense_hold_slots: u64,
    pub defense_held: bool,
    /// Post-window sells at or above half the triggering size
    pub additional_large_sells: u32,
    /// 0..=100
    pub confidence_score: f64,
}

/// Outcome recorded against a wallet for one absorption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceOutcome {
    Success,
    Failure,
    Pending,
}

/// One entry of a wallet's evidence ring buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorptionEvidence {
    pub event_id: String,
    pub token_mint: String,
    pub slot: Slot,
    pub timestamp: DateTime<Utc>,
    pub absorption_fraction: f64,
    pub stabilized: bool,
    pub response_latency_slots: Slot,
    pub outcome: EvidenceOutcome,
}

/// Activity cadence of a wallet across its evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityPattern {
    Consistent,
    Cyclical,
    Opportunistic,
}

/// Behavioral classification of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletClass {
    Candidate,
    DefensiveInfra,
    AggressiveInfra,
    Cyclical,
    Opportunistic,
    Noise,
}

impl WalletClass {
    /// Infrastructure classifications survive decay as `deprecated`
    pub fn is_infra(&self) -> bool {
        matches!(self, WalletClass::DefensiveInfra | WalletClass::AggressiveInfra)
    }
}

impl std::fmt::Display for WalletClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WalletClass::Candidate => "candidate",
            WalletClass::DefensiveInfra => "defensive-infra",
            WalletClass::AggressiveInfra => "aggressive-infra",
            WalletClass::Cyclical => "cyclical",
            WalletClass::Opportunistic => "opportunistic",
            WalletClass::Noise => "noise",
        };
        write!(f, "{}", s)
    }
}

/// Liveness of a tracked wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Decaying,
    Deprecated,
}

/// Lifecycle of an emitted signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Active,
    Confirmed,
    Expired,
    Invalidated,
}

/// Actionable output: an infra wallet is currently absorbing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub token_mint: String,
    pub pool_address: String,
    pub trigger_sell_event_id: String,
    pub absorber_wallet: String,
    /// Price immediately after the triggering sell
    pub defended_price: f64,
    /// 0..=100 weighted mixture of absorption, speed, classification, size
    pub strength: f64,
    pub stabilization_confirmed: bool,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub created_slot: Slot,
}

/// A sell event finalized by the analyzer, candidates attached.
///
/// Flows from the analyzer to the validator and (via the validator's ordered
/// stream) to the scoring stage. Candidates are sorted by absorption fraction
/// descending, wallet ascending.
#[derive(Debug, Clone)]
pub struct FinalizedSell {
    pub sell: SellEvent,
    /// Meaningful candidates only, in deterministic order
    pub candidates: Vec<AbsorptionCandidate>,
    /// All candidates observed, including non-meaningful ones
    pub total_candidates: usize,
    /// Base volume (both sides) traded inside the observation window
    pub window_volume_base: f64,
}

/// Scorer input: a finalized sell with its stabilization verdict
#[derive(Debug, Clone)]
pub struct ValidatedSell {
    pub sell: SellEvent,
    pub candidates: Vec<AbsorptionCandidate>,
    pub result: StabilizationResult,
}

/// Candidate map keyed by wallet, owned by an open window.
///
/// `BTreeMap` so iteration order never leaks nondeterminism into outputs.
pub type CandidateMap = BTreeMap<String, AbsorptionCandidate>;

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(base: f64, token: f64) -> PoolStateSnapshot {
        PoolStateSnapshot {
            slot: 1,
            pool_address: "pool".into(),
            reserve_base: base,
            reserve_token: token,
            price_base: base / token,
            liquidity_usd: None,
        }
    }

    #[test]
    fn test_event_key_ordering() {
        let a = EventKey::new(10, 0, 0, 0);
        let b = EventKey::new(10, 0, 0, 1);
        let c = EventKey::new(10, 1, 0, 0);
        let d = EventKey::new(11, 0, 0, 0);
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn test_pool_state_validation() {
        assert!(snapshot(100.0, 10_000.0).validate().is_ok());

        let mut bad = snapshot(100.0, 10_000.0);
        bad.reserve_token = 0.0;
        assert!(bad.validate().is_err());

        let mut inconsistent = snapshot(100.0, 10_000.0);
        inconsistent.price_base = 0.5;
        assert!(inconsistent.validate().is_err());
    }

    #[test]
    fn test_sell_state_transitions() {
        let mut sell = SellEvent {
            id: SellEvent::make_id("mint", 10, 0),
            token_mint: "mint".into(),
            pool_address: "pool".into(),
            slot: 10,
            block_time: Utc::now(),
            seller_wallet: "seller".into(),
            sell_amount_base: 2.0,
            fraction_of_pool: 0.02,
            pre_event_price: 0.01,
            post_event_price: 0.0098,
            window_end_slot: 60,
            state: SellState::Observing,
        };

        assert!(sell.transition(SellState::Validated).is_err());
        assert!(sell.transition(SellState::Analyzing).is_ok());
        assert!(sell.transition(SellState::Observing).is_err());
        assert!(sell.transition(SellState::Validated).is_ok());
        assert!(sell.transition(SellState::Invalidated).is_err());
    }

    #[test]
    fn test_sell_event_id_is_deterministic() {
        assert_eq!(SellEvent::make_id("So111", 42, 3), "So111:42:3");
    }

    #[test]
    fn test_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), r#""sell""#);
        let side: Side = serde_json::from_str(r#""buy""#).unwrap();
        assert_eq!(side, Side::Buy);
    }

    #[test]
    fn test_wallet_class_display() {
        assert_eq!(WalletClass::DefensiveInfra.to_string(), "defensive-infra");
        assert!(WalletClass::AggressiveInfra.is_infra());
        assert!(!WalletClass::Cyclical.is_infra());
    }
}
