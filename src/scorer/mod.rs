//! Longitudinal wallet scorer
//!
//! Accumulates absorption evidence per wallet across events, recomputes
//! confidence and classification, and decays inactive wallets. The scorer
//! exclusively owns all `WalletBehavior` state; everything else in the
//! pipeline sees immutable copies. In-memory state is authoritative:
//! persistence failures are logged and never surfaced.

pub mod classify;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ScoringConfig;
use crate::error::{Error, Result};
use crate::events::{
    AbsorptionCandidate, AbsorptionEvidence, ActivityPattern, EvidenceOutcome,
    StabilizationResult, WalletClass, WalletStatus,
};
use classify::WalletAggregates;

/// Everything the scorer knows about one wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBehavior {
    pub wallet: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_absorptions: u32,
    pub successful_absorptions: u32,
    pub failed_absorptions: u32,
    pub unique_tokens: BTreeSet<String>,
    /// Bounded ring of recent evidence
    pub evidence: VecDeque<AbsorptionEvidence>,
    pub stabilization_success_rate: f64,
    pub avg_absorption_fraction: f64,
    pub avg_response_latency: f64,
    pub size_consistency: f64,
    pub activity_pattern: ActivityPattern,
    /// Confidence from the scoring factors, before inactivity decay
    pub raw_confidence: f64,
    /// Effective confidence after decay, in [0, 100]
    pub confidence: f64,
    pub classification: WalletClass,
    pub status: WalletStatus,
}

impl WalletBehavior {
    fn new(wallet: String, now: DateTime<Utc>) -> Self {
        Self {
            wallet,
            first_seen: now,
            last_seen: now,
            total_absorptions: 0,
            successful_absorptions: 0,
            failed_absorptions: 0,
            unique_tokens: BTreeSet::new(),
            evidence: VecDeque::new(),
            stabilization_success_rate: 0.0,
            avg_absorption_fraction: 0.0,
            avg_response_latency: 0.0,
            size_consistency: 100.0,
            activity_pattern: ActivityPattern::Opportunistic,
            raw_confidence: 0.0,
            confidence: 0.0,
            classification: WalletClass::Candidate,
            status: WalletStatus::Active,
        }
    }

    fn aggregates(&self) -> WalletAggregates {
        WalletAggregates {
            total_absorptions: self.total_absorptions,
            successful_absorptions: self.successful_absorptions,
            failed_absorptions: self.failed_absorptions,
            unique_tokens: self.unique_tokens.len() as u32,
            stabilization_success_rate: self.stabilization_success_rate,
            avg_absorption_fraction: self.avg_absorption_fraction,
            avg_response_latency: self.avg_response_latency,
            size_consistency: self.size_consistency,
            activity_pattern: self.activity_pattern,
        }
    }
}

pub struct WalletScorer {
    config: ScoringConfig,
    max_response_latency_slots: u64,
    wallets: DashMap<String, WalletBehavior>,
    last_decay: Mutex<Option<DateTime<Utc>>>,
}

impl WalletScorer {
    pub fn new(config: ScoringConfig, max_response_latency_slots: u64) -> Self {
        Self {
            config,
            max_response_latency_slots,
            wallets: DashMap::new(),
            last_decay: Mutex::new(None),
        }
    }

    /// Record one meaningful candidate together with its stabilization
    /// verdict. Mutations for a single wallet are serialized by the map's
    /// per-key lock.
    pub fn record(
        &self,
        candidate: &AbsorptionCandidate,
        result: &StabilizationResult,
        now: DateTime<Utc>,
    ) {
        {
            let mut entry = self
                .wallets
                .entry(candidate.wallet.clone())
                .or_insert_with(|| WalletBehavior::new(candidate.wallet.clone(), now));
            let behavior = entry.value_mut();

            behavior.last_seen = now;
            behavior.total_absorptions += 1;
            if result.stabilized {
                behavior.successful_absorptions += 1;
            } else {
                behavior.failed_absorptions += 1;
            }
            behavior.unique_tokens.insert(candidate.token_mint.clone());

            behavior.evidence.push_back(AbsorptionEvidence {
                event_id: candidate.event_id.clone(),
                token_mint: candidate.token_mint.clone(),
                slot: candidate.first_buy_slot,
                timestamp: now,
                absorption_fraction: candidate.absorption_fraction,
                stabilized: result.stabilized,
                response_latency_slots: candidate.response_latency_slots,
                outcome: if result.stabilized {
                    EvidenceOutcome::Success
                } else {
                    EvidenceOutcome::Failure
                },
            });
            while behavior.evidence.len() > self.config.max_evidence_per_wallet {
                behavior.evidence.pop_front();
            }

            Self::recompute(behavior, &self.config, self.max_response_latency_slots);
            behavior.status = WalletStatus::Active;

            debug!(
                wallet = %behavior.wallet,
                total = behavior.total_absorptions,
                confidence = behavior.confidence,
                class = %behavior.classification,
                "Wallet evidence recorded"
            );
        }

        self.enforce_capacity();
    }

    fn recompute(behavior: &mut WalletBehavior, config: &ScoringConfig, max_latency: u64) {
        behavior.stabilization_success_rate = if behavior.total_absorptions > 0 {
            behavior.successful_absorptions as f64 / behavior.total_absorptions as f64
        } else {
            0.0
        };

        let fractions: Vec<f64> = behavior
            .evidence
            .iter()
            .map(|e| e.absorption_fraction)
            .collect();
        behavior.avg_absorption_fraction = if fractions.is_empty() {
            0.0
        } else {
            fractions.iter().sum::<f64>() / fractions.len() as f64
        };

        behavior.avg_response_latency = if behavior.evidence.is_empty() {
            0.0
        } else {
            behavior
                .evidence
                .iter()
                .map(|e| e.response_latency_slots as f64)
                .sum::<f64>()
                / behavior.evidence.len() as f64
        };

        behavior.size_consistency = classify::size_consistency(&fractions);

        let times: Vec<i64> = behavior
            .evidence
            .iter()
            .map(|e| e.timestamp.timestamp())
            .collect();
        behavior.activity_pattern = classify::activity_pattern(&times);

        let aggregates = behavior.aggregates();
        behavior.raw_confidence = classify::confidence(&aggregates, max_latency);
        behavior.confidence = behavior.raw_confidence;
        behavior.classification = classify::classify(&aggregates, behavior.confidence, config);
    }

    /// Current classification of a wallet, if tracked
    pub fn classification_of(&self, wallet: &str) -> Option<WalletClass> {
        self.wallets.get(wallet).map(|b| b.classification)
    }

    /// Owned copy of one wallet's state
    pub fn get(&self, wallet: &str) -> Option<WalletBehavior> {
        self.wallets.get(wallet).map(|b| b.clone())
    }

    pub fn tracked_wallets(&self) -> usize {
        self.wallets.len()
    }

    /// Run the decay sweep if a full decay interval has elapsed since the
    /// previous one, per the active clock.
    pub fn maybe_decay(&self, now: DateTime<Utc>) {
        let due = {
            let mut last = self.last_decay.lock().unwrap_or_else(|e| e.into_inner());
            let due = match *last {
                None => true,
                Some(prev) => (now - prev).num_seconds() >= self.config.decay_interval_secs as i64,
            };
            if due {
                *last = Some(now);
            }
            due
        };
        if due {
            self.decay_sweep(now);
        }
    }

    /// Walk all wallets and decay the inactive ones.
    ///
    /// Confidence decays from the raw (pre-decay) score, so repeated sweeps
    /// are idempotent for a given `now`. Wallets falling below the
    /// confidence floor are pruned unless they carry an infrastructure
    /// classification; those are deprecated but retained.
    pub fn decay_sweep(&self, now: DateTime<Utc>) -> usize {
        // Sorted key list keeps the sweep order deterministic
        let mut keys: Vec<String> = self.wallets.iter().map(|e| e.key().clone()).collect();
        keys.sort();

        let mut pruned = 0usize;
        for wallet in keys {
            let mut remove = false;
            if let Some(mut entry) = self.wallets.get_mut(&wallet) {
                let behavior = entry.value_mut();
                let days_inactive =
                    (now - behavior.last_seen).num_seconds() as f64 / 86_400.0;
                if days_inactive <= self.config.decay_days {
                    continue;
                }

                let penalty = days_inactive / self.config.decay_days * self.config.decay_step;
                behavior.confidence = (behavior.raw_confidence - penalty).max(0.0);
                behavior.status = WalletStatus::Decaying;

                if behavior.confidence < self.config.min_confidence {
                    if behavior.classification.is_infra() {
                        behavior.status = WalletStatus::Deprecated;
                    } else {
                        remove = true;
                    }
                }
            }
            if remove {
                self.wallets.remove(&wallet);
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(pruned, "Decay sweep pruned wallets");
        }
        pruned
    }

    /// Consistent snapshot of every tracked wallet, sorted by address
    pub fn snapshot(&self) -> Vec<WalletBehavior> {
        let mut all: Vec<WalletBehavior> = self.wallets.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.wallet.cmp(&b.wallet));
        all
    }

    /// Serialize scorer state to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(Error::from)
    }

    /// Restore scorer state from JSON produced by [`Self::to_json`]
    pub fn restore_json(&self, json: &str) -> Result<usize> {
        let behaviors: Vec<WalletBehavior> = serde_json::from_str(json)?;
        let n = behaviors.len();
        self.wallets.clear();
        for b in behaviors {
            self.wallets.insert(b.wallet.clone(), b);
        }
        Ok(n)
    }

    /// Persist to disk; failures are logged, never propagated
    pub fn persist<P: AsRef<Path>>(&self, path: P) {
        let write = || -> Result<()> {
            let json = self.to_json()?;
            std::fs::write(path.as_ref(), json).map_err(|e| Error::Persistence(e.to_string()))
        };
        if let Err(e) = write() {
            warn!(error = %e, "Scorer persistence failed, in-memory state remains authoritative");
        }
    }

    /// Load persisted state if present; absence is not an error
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        if !path.as_ref().exists() {
            return Ok(0);
        }
        let json =
            std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Persistence(e.to_string()))?;
        let n = self.restore_json(&json)?;
        info!(wallets = n, "Restored scorer state");
        Ok(n)
    }

    /// Evict the weakest non-infra wallets once over capacity
    fn enforce_capacity(&self) {
        let over = self.wallets.len().saturating_sub(self.config.max_tracked_wallets);
        if over == 0 {
            return;
        }

        let mut evictable: Vec<(f64, String)> = self
            .wallets
            .iter()
            .filter(|e| !e.value().classification.is_infra())
            .map(|e| (e.value().confidence, e.key().clone()))
            .collect();
        evictable.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        for (_, wallet) in evictable.into_iter().take(over) {
            self.wallets.remove(&wallet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candidate(wallet: &str, token: &str, fraction: f64) -> AbsorptionCandidate {
        AbsorptionCandidate {
            event_id: format!("{}:10:0", token),
            wallet: wallet.to_string(),
            token_mint: token.to_string(),
            total_buy_base: fraction * 2.0,
            buy_count: 1,
            absorption_fraction: fraction,
            response_latency_slots: 2,
            avg_price_impact: 1.0,
            first_buy_slot: 11,
            last_buy_slot: 12,
            bought_during_dip: true,
        }
    }

    fn result(stabilized: bool) -> StabilizationResult {
        StabilizationResult {
            event_id: "t:10:0".into(),
            stabilized,
            price_recovery_pct: 1.0,
            made_new_low: false,
            volume_contraction_pct: 50.0,
            defense_level: 0.0096,
            defense_hold_slots: 4,
            defense_held: true,
            additional_large_sells: 0,
            confidence_score: 90.0,
        }
    }

    fn scorer() -> WalletScorer {
        WalletScorer::new(ScoringConfig::default(), 8)
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_first_evidence_creates_wallet() {
        let s = scorer();
        s.record(&candidate("W_A", "tok1", 0.6), &result(true), t0());

        let b = s.get("W_A").unwrap();
        assert_eq!(b.total_absorptions, 1);
        assert_eq!(b.successful_absorptions, 1);
        assert_eq!(b.unique_tokens.len(), 1);
        assert_eq!(b.evidence.len(), 1);
        assert_eq!(b.evidence[0].outcome, EvidenceOutcome::Success);
        assert_eq!(b.classification, WalletClass::Candidate);
        assert_eq!(b.status, WalletStatus::Active);
    }

    #[test]
    fn test_failed_evidence_recorded() {
        let s = scorer();
        s.record(&candidate("W_A", "tok1", 0.6), &result(false), t0());

        let b = s.get("W_A").unwrap();
        assert_eq!(b.failed_absorptions, 1);
        assert_eq!(b.evidence[0].outcome, EvidenceOutcome::Failure);
        assert_eq!(b.stabilization_success_rate, 0.0);
    }

    #[test]
    fn test_classification_promotes_with_history() {
        let s = scorer();
        let mut now = t0();
        for (i, token) in ["tok1", "tok2", "tok3", "tok4"].iter().enumerate() {
            now = t0() + Duration::hours(i as i64);
            s.record(&candidate("W_A", token, 0.6), &result(true), now);
        }

        let b = s.get("W_A").unwrap();
        assert_eq!(b.stabilization_success_rate, 1.0);
        assert!(b.confidence >= ScoringConfig::default().min_confidence);
        // Perfect rate and tight sizing: defensive infrastructure
        assert_eq!(b.classification, WalletClass::DefensiveInfra);
    }

    #[test]
    fn test_evidence_ring_bounded() {
        let mut config = ScoringConfig::default();
        config.max_evidence_per_wallet = 3;
        let s = WalletScorer::new(config, 8);

        for i in 0..10 {
            s.record(
                &candidate("W_A", "tok1", 0.5),
                &result(true),
                t0() + Duration::minutes(i),
            );
        }
        let b = s.get("W_A").unwrap();
        assert_eq!(b.evidence.len(), 3);
        assert_eq!(b.total_absorptions, 10);
    }

    #[test]
    fn test_decay_matches_formula() {
        let s = scorer();
        // Build a wallet, then force its raw confidence to a known value
        s.record(&candidate("W_A", "tok1", 0.6), &result(true), t0());
        {
            let mut e = s.wallets.get_mut("W_A").unwrap();
            e.value_mut().raw_confidence = 80.0;
            e.value_mut().confidence = 80.0;
        }

        // 14 days later with decay_days = 7, step = 10: 80 - (14/7)*10 = 60
        let now = t0() + Duration::days(14);
        s.decay_sweep(now);

        let b = s.get("W_A").unwrap();
        assert!((b.confidence - 60.0).abs() < 1e-9);
        assert_eq!(b.status, WalletStatus::Decaying);
        // Raw confidence is untouched, so the sweep is idempotent
        s.decay_sweep(now);
        assert!((s.get("W_A").unwrap().confidence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_decay_prunes_non_infra() {
        let s = scorer();
        s.record(&candidate("W_A", "tok1", 0.6), &result(false), t0());

        // Far below the floor after a long absence
        let now = t0() + Duration::days(100);
        s.decay_sweep(now);
        assert!(s.get("W_A").is_none());
    }

    #[test]
    fn test_decay_deprecates_infra() {
        let s = scorer();
        let mut now = t0();
        for (i, token) in ["tok1", "tok2", "tok3", "tok4"].iter().enumerate() {
            now = t0() + Duration::hours(i as i64);
            s.record(&candidate("W_A", token, 0.6), &result(true), now);
        }
        assert!(s.get("W_A").unwrap().classification.is_infra());

        s.decay_sweep(now + Duration::days(365));
        let b = s.get("W_A").unwrap();
        assert_eq!(b.status, WalletStatus::Deprecated);
    }

    #[test]
    fn test_maybe_decay_rate_limited() {
        let s = scorer();
        s.record(&candidate("W_A", "tok1", 0.6), &result(true), t0());
        {
            let mut e = s.wallets.get_mut("W_A").unwrap();
            e.value_mut().raw_confidence = 80.0;
            e.value_mut().confidence = 80.0;
        }

        let later = t0() + Duration::days(14);
        s.maybe_decay(later);
        assert!((s.get("W_A").unwrap().confidence - 60.0).abs() < 1e-9);

        // Within the same interval nothing runs, even further in the future
        let slightly_later = later + Duration::seconds(10);
        s.maybe_decay(slightly_later);
        assert!((s.get("W_A").unwrap().confidence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_sorted_and_round_trips() {
        let s = scorer();
        s.record(&candidate("W_B", "tok1", 0.5), &result(true), t0());
        s.record(&candidate("W_A", "tok2", 0.6), &result(false), t0());

        let snap = s.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].wallet, "W_A");

        // Pause/resume: restore into a fresh scorer, classifications equal
        let json = s.to_json().unwrap();
        let restored = scorer();
        assert_eq!(restored.restore_json(&json).unwrap(), 2);
        for b in s.snapshot() {
            let r = restored.get(&b.wallet).unwrap();
            assert_eq!(r.classification, b.classification);
            assert_eq!(r.confidence, b.confidence);
            assert_eq!(r.total_absorptions, b.total_absorptions);
        }
    }

    #[test]
    fn test_capacity_evicts_weakest_non_infra() {
        let mut config = ScoringConfig::default();
        config.max_tracked_wallets = 2;
        let s = WalletScorer::new(config, 8);

        s.record(&candidate("W_A", "tok1", 0.6), &result(true), t0());
        s.record(&candidate("W_B", "tok1", 0.6), &result(false), t0());
        s.record(&candidate("W_C", "tok1", 0.6), &result(true), t0());

        assert_eq!(s.tracked_wallets(), 2);
        // W_B had the failure and thus the lowest confidence
        assert!(s.get("W_B").is_none());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scorer.json");

        let s = scorer();
        s.record(&candidate("W_A", "tok1", 0.6), &result(true), t0());
        s.persist(&path);

        let restored = scorer();
        assert_eq!(restored.load(&path).unwrap(), 1);
        assert_eq!(
            restored.get("W_A").unwrap().total_absorptions,
            s.get("W_A").unwrap().total_absorptions
        );

        // Missing file is not an error
        let empty = scorer();
        assert_eq!(empty.load(dir.path().join("absent.json")).unwrap(), 0);
    }
}
