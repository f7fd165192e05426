//! Pure scoring and classification functions
//!
//! Classification is a deterministic function of a wallet's aggregates and
//! the configured thresholds; nothing here touches clocks or state.

use crate::config::ScoringConfig;
use crate::events::ActivityPattern;
use crate::events::WalletClass;

/// Inputs to confidence and classification, already aggregated
#[derive(Debug, Clone, Copy)]
pub struct WalletAggregates {
    pub total_absorptions: u32,
    pub successful_absorptions: u32,
    pub failed_absorptions: u32,
    pub unique_tokens: u32,
    pub stabilization_success_rate: f64,
    pub avg_absorption_fraction: f64,
    pub avg_response_latency: f64,
    pub size_consistency: f64,
    pub activity_pattern: ActivityPattern,
}

/// Size consistency in [0, 100]: higher when the coefficient of variation
/// of absorption fractions is lower.
pub fn size_consistency(fractions: &[f64]) -> f64 {
    if fractions.len() < 2 {
        return 100.0;
    }
    let n = fractions.len() as f64;
    let mean = fractions.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = fractions.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    ((1.0 - cv.min(1.0)) * 100.0).clamp(0.0, 100.0)
}

/// Activity pattern from inter-event intervals (any monotonic unit).
///
/// Consistent when no gap exceeds twice the average; cyclical when some gap
/// exceeds five times the average; opportunistic otherwise, and always for
/// wallets with too little history to judge.
pub fn activity_pattern(event_times: &[i64]) -> ActivityPattern {
    if event_times.len() < 3 {
        return ActivityPattern::Opportunistic;
    }
    let intervals: Vec<f64> = event_times
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0) as f64)
        .collect();
    let avg = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if avg <= 0.0 {
        return ActivityPattern::Consistent;
    }
    let max = intervals.iter().cloned().fold(0.0_f64, f64::max);
    if max < 2.0 * avg {
        ActivityPattern::Consistent
    } else if max > 5.0 * avg {
        ActivityPattern::Cyclical
    } else {
        ActivityPattern::Opportunistic
    }
}

/// Six additive confidence factors, minus a failure penalty, clamped.
///
/// Factor caps per the scoring design: events 30, stabilization rate 25,
/// unique tokens 15, size consistency 10, activity pattern 10,
/// timeliness 10; minus 20 x failure rate.
pub fn confidence(agg: &WalletAggregates, max_response_latency_slots: u64) -> f64 {
    let event_factor = (3.0 * agg.total_absorptions as f64).min(30.0);
    let rate_factor = 25.0 * agg.stabilization_success_rate;
    let token_factor = (3.0 * agg.unique_tokens as f64).min(15.0);
    let size_factor = agg.size_consistency / 10.0;
    let pattern_factor = match agg.activity_pattern {
        ActivityPattern::Consistent => 10.0,
        ActivityPattern::Cyclical => 6.0,
        ActivityPattern::Opportunistic => 3.0,
    };
    let timeliness_factor = if max_response_latency_slots > 0 {
        (10.0 * (1.0 - agg.avg_response_latency / max_response_latency_slots as f64))
            .clamp(0.0, 10.0)
    } else {
        0.0
    };

    let decided = agg.successful_absorptions + agg.failed_absorptions;
    let failure_rate = if decided > 0 {
        agg.failed_absorptions as f64 / decided as f64
    } else {
        0.0
    };

    (event_factor
        + rate_factor
        + token_factor
        + size_factor
        + pattern_factor
        + timeliness_factor
        - 20.0 * failure_rate)
        .clamp(0.0, 100.0)
}

/// Deterministic classification from aggregates, confidence, and thresholds
pub fn classify(agg: &WalletAggregates, confidence: f64, config: &ScoringConfig) -> WalletClass {
    let qualified = agg.total_absorptions >= config.min_events
        && agg.unique_tokens >= config.min_tokens
        && agg.stabilization_success_rate >= config.min_stabilization_rate
        && confidence >= config.min_confidence;

    if !qualified {
        // Noise needs enough events to prove the failure; everything
        // younger stays a candidate
        return if agg.total_absorptions >= config.min_events
            && agg.stabilization_success_rate < config.min_stabilization_rate
        {
            WalletClass::Noise
        } else {
            WalletClass::Candidate
        };
    }

    if agg.stabilization_success_rate >= 0.8 && agg.size_consistency >= 70.0 {
        WalletClass::DefensiveInfra
    } else if agg.stabilization_success_rate >= 0.7 && agg.avg_absorption_fraction >= 0.4 {
        WalletClass::AggressiveInfra
    } else if agg.activity_pattern == ActivityPattern::Cyclical {
        WalletClass::Cyclical
    } else {
        WalletClass::Opportunistic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregates() -> WalletAggregates {
        WalletAggregates {
            total_absorptions: 5,
            successful_absorptions: 4,
            failed_absorptions: 1,
            unique_tokens: 3,
            stabilization_success_rate: 0.8,
            avg_absorption_fraction: 0.5,
            avg_response_latency: 2.0,
            size_consistency: 80.0,
            activity_pattern: ActivityPattern::Consistent,
        }
    }

    #[test]
    fn test_size_consistency_bounds() {
        assert_eq!(size_consistency(&[0.5]), 100.0);
        assert_eq!(size_consistency(&[0.5, 0.5, 0.5]), 100.0);
        // Wild variation scores low
        let spread = size_consistency(&[0.1, 0.9, 0.1, 0.9]);
        assert!(spread < 30.0);
        // Mild variation scores in between
        let mild = size_consistency(&[0.45, 0.5, 0.55]);
        assert!(mild > 80.0 && mild < 100.0);
    }

    #[test]
    fn test_activity_pattern() {
        assert_eq!(activity_pattern(&[0, 100]), ActivityPattern::Opportunistic);
        assert_eq!(
            activity_pattern(&[0, 100, 200, 300]),
            ActivityPattern::Consistent
        );
        // A long dormancy after a burst of activity reads as cyclical
        assert_eq!(
            activity_pattern(&[0, 10, 20, 30, 40, 50, 560]),
            ActivityPattern::Cyclical
        );
        assert_eq!(
            activity_pattern(&[0, 100, 200, 600]),
            ActivityPattern::Opportunistic
        );
    }

    #[test]
    fn test_confidence_caps_and_penalty() {
        let mut agg = aggregates();
        agg.total_absorptions = 100;
        agg.unique_tokens = 50;
        agg.failed_absorptions = 0;
        agg.successful_absorptions = 100;
        agg.stabilization_success_rate = 1.0;
        agg.size_consistency = 100.0;
        agg.avg_response_latency = 0.0;
        // All factors at cap: 30+25+15+10+10+10 = 100
        assert_eq!(confidence(&agg, 8), 100.0);

        // Pure failure drags the score down by the penalty
        agg.successful_absorptions = 0;
        agg.failed_absorptions = 100;
        agg.stabilization_success_rate = 0.0;
        let c = confidence(&agg, 8);
        assert!(c < 100.0 - 25.0);
    }

    #[test]
    fn test_classify_defensive_infra() {
        let config = ScoringConfig::default();
        let agg = aggregates();
        let class = classify(&agg, 80.0, &config);
        assert_eq!(class, WalletClass::DefensiveInfra);
    }

    #[test]
    fn test_classify_aggressive_infra() {
        let config = ScoringConfig::default();
        let mut agg = aggregates();
        agg.stabilization_success_rate = 0.75;
        agg.size_consistency = 50.0;
        agg.avg_absorption_fraction = 0.45;
        assert_eq!(classify(&agg, 80.0, &config), WalletClass::AggressiveInfra);
    }

    #[test]
    fn test_classify_below_min_events_is_candidate() {
        let config = ScoringConfig::default();
        let mut agg = aggregates();
        agg.total_absorptions = config.min_events - 1;
        // Regardless of a perfect record
        agg.stabilization_success_rate = 1.0;
        assert_eq!(classify(&agg, 99.0, &config), WalletClass::Candidate);
    }

    #[test]
    fn test_classify_noise_needs_enough_events() {
        let config = ScoringConfig::default();
        let mut agg = aggregates();
        agg.total_absorptions = config.min_events;
        agg.stabilization_success_rate = 0.1;
        assert_eq!(classify(&agg, 80.0, &config), WalletClass::Noise);

        agg.total_absorptions = config.min_events - 1;
        assert_eq!(classify(&agg, 80.0, &config), WalletClass::Candidate);
    }

    #[test]
    fn test_classify_cyclical_and_opportunistic() {
        let config = ScoringConfig::default();
        let mut agg = aggregates();
        agg.stabilization_success_rate = 0.7;
        agg.size_consistency = 40.0;
        agg.avg_absorption_fraction = 0.2;
        agg.activity_pattern = ActivityPattern::Cyclical;
        assert_eq!(classify(&agg, 80.0, &config), WalletClass::Cyclical);

        agg.activity_pattern = ActivityPattern::Consistent;
        assert_eq!(classify(&agg, 80.0, &config), WalletClass::Opportunistic);
    }
}
