//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub absorption: AbsorptionConfig,
    #[serde(default)]
    pub stabilization: StabilizationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Large-sell detection parameters. Fractions are in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Sells below this fraction of pool reserves are noise
    #[serde(default = "default_min_sell_fraction")]
    pub min_sell_fraction: f64,
    /// Sells above this fraction are panic dumps, not defended events
    #[serde(default = "default_max_sell_fraction")]
    pub max_sell_fraction: f64,
    /// Observation window length after a qualifying sell
    #[serde(default = "default_absorption_window_slots")]
    pub absorption_window_slots: u64,
    /// Buys later than this after the sell are not responses
    #[serde(default = "default_max_response_latency_slots")]
    pub max_response_latency_slots: u64,
    /// Rolling window for the pre-event price average
    #[serde(default = "default_pre_event_price_window_secs")]
    pub pre_event_price_window_secs: u64,
    /// Finalized sell events are kept around this long for attribution
    #[serde(default = "default_sell_retention_slots")]
    pub sell_retention_slots: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_sell_fraction: default_min_sell_fraction(),
            max_sell_fraction: default_max_sell_fraction(),
            absorption_window_slots: default_absorption_window_slots(),
            max_response_latency_slots: default_max_response_latency_slots(),
            pre_event_price_window_secs: default_pre_event_price_window_secs(),
            sell_retention_slots: default_sell_retention_slots(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorptionConfig {
    /// Minimum fraction of the sell a candidate must buy back
    #[serde(default = "default_min_absorption")]
    pub min_absorption: f64,
    /// Candidates above this fraction are treated as data-shape errors
    #[serde(default = "default_max_absorption")]
    pub max_absorption: f64,
}

impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self {
            min_absorption: default_min_absorption(),
            max_absorption: default_max_absorption(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationConfig {
    /// Post-window interval evaluated for stabilization
    #[serde(default = "default_stabilization_window_slots")]
    pub stabilization_window_slots: u64,
    /// Maximum tolerated price drop, percent
    #[serde(default = "default_max_price_drop_pct")]
    pub max_price_drop_pct: f64,
    /// Minimum volume contraction, percent
    #[serde(default = "default_min_contraction_pct")]
    pub min_contraction_pct: f64,
    /// Fractional tolerance below the post-event price before a new low counts
    #[serde(default = "default_new_low_tolerance")]
    pub new_low_tolerance: f64,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            stabilization_window_slots: default_stabilization_window_slots(),
            max_price_drop_pct: default_max_price_drop_pct(),
            min_contraction_pct: default_min_contraction_pct(),
            new_low_tolerance: default_new_low_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Minimum absorptions before a wallet can leave `candidate`
    #[serde(default = "default_min_events")]
    pub min_events: u32,
    /// Minimum distinct tokens absorbed
    #[serde(default = "default_min_tokens")]
    pub min_tokens: u32,
    /// Minimum stabilization success rate
    #[serde(default = "default_min_stabilization_rate")]
    pub min_stabilization_rate: f64,
    /// Minimum confidence to hold a classification
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_tracked_wallets")]
    pub max_tracked_wallets: usize,
    #[serde(default = "default_max_evidence_per_wallet")]
    pub max_evidence_per_wallet: usize,
    /// Inactivity horizon before confidence decays
    #[serde(default = "default_decay_days")]
    pub decay_days: f64,
    /// Confidence subtracted per decay horizon elapsed
    #[serde(default = "default_decay_step")]
    pub decay_step: f64,
    /// Minimum interval between decay sweeps, seconds of clock time
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
    /// Optional path for scorer state snapshots
    #[serde(default)]
    pub persist_path: Option<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_events: default_min_events(),
            min_tokens: default_min_tokens(),
            min_stabilization_rate: default_min_stabilization_rate(),
            min_confidence: default_min_confidence(),
            max_tracked_wallets: default_max_tracked_wallets(),
            max_evidence_per_wallet: default_max_evidence_per_wallet(),
            decay_days: default_decay_days(),
            decay_step: default_decay_step(),
            decay_interval_secs: default_decay_interval_secs(),
            persist_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Signals below this strength are not acted on in the sandbox
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_strength: default_min_strength(),
        }
    }
}

/// Named fill-simulation friction levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Zero friction
    Idealized,
    /// Moderate latency, slippage, and failure rates
    Realistic,
    /// High failure and slippage
    Stress,
    /// Use the explicitly configured values as-is
    Custom,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Realistic
    }
}

/// Slippage model for simulated fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlippageModel {
    None,
    Constant,
    Reserves,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_latency_slots")]
    pub latency_slots: u64,
    #[serde(default = "default_slippage_model")]
    pub slippage_model: SlippageModel,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(default = "default_quote_stale_prob")]
    pub quote_stale_prob: f64,
    #[serde(default = "default_route_fail_prob")]
    pub route_fail_prob: f64,
    #[serde(default = "default_partial_fill_prob")]
    pub partial_fill_prob: f64,
    #[serde(default = "default_partial_fill_ratio")]
    pub partial_fill_ratio: f64,
    #[serde(default = "default_lp_fee_bps")]
    pub lp_fee_bps: f64,
    /// Flat per-fill fee in base units
    #[serde(default = "default_priority_fee")]
    pub priority_fee: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            latency_slots: default_latency_slots(),
            slippage_model: default_slippage_model(),
            slippage_bps: default_slippage_bps(),
            quote_stale_prob: default_quote_stale_prob(),
            route_fail_prob: default_route_fail_prob(),
            partial_fill_prob: default_partial_fill_prob(),
            partial_fill_ratio: default_partial_fill_ratio(),
            lp_fee_bps: default_lp_fee_bps(),
            priority_fee: default_priority_fee(),
        }
    }
}

impl ExecutionConfig {
    /// Resolve the effective parameters: named modes override the
    /// individual fields, `custom` uses them verbatim.
    pub fn resolved(&self) -> ExecutionConfig {
        match self.mode {
            ExecutionMode::Idealized => ExecutionConfig {
                mode: ExecutionMode::Idealized,
                latency_slots: 0,
                slippage_model: SlippageModel::None,
                slippage_bps: 0.0,
                quote_stale_prob: 0.0,
                route_fail_prob: 0.0,
                partial_fill_prob: 0.0,
                partial_fill_ratio: 1.0,
                lp_fee_bps: 0.0,
                priority_fee: 0.0,
            },
            ExecutionMode::Realistic => ExecutionConfig {
                mode: ExecutionMode::Realistic,
                latency_slots: 2,
                slippage_model: SlippageModel::Reserves,
                slippage_bps: 50.0,
                quote_stale_prob: 0.02,
                route_fail_prob: 0.01,
                partial_fill_prob: 0.05,
                partial_fill_ratio: 0.5,
                lp_fee_bps: 30.0,
                priority_fee: 0.0001,
            },
            ExecutionMode::Stress => ExecutionConfig {
                mode: ExecutionMode::Stress,
                latency_slots: 5,
                slippage_model: SlippageModel::Reserves,
                slippage_bps: 150.0,
                quote_stale_prob: 0.10,
                route_fail_prob: 0.08,
                partial_fill_prob: 0.20,
                partial_fill_ratio: 0.4,
                lp_fee_bps: 30.0,
                priority_fee: 0.0005,
            },
            ExecutionMode::Custom => self.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    #[serde(default = "default_starting_capital")]
    pub starting_capital_base: f64,
    #[serde(default = "default_max_position_size")]
    pub max_position_size_base: f64,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    /// Percent of current capital risked per trade
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            starting_capital_base: default_starting_capital(),
            max_position_size_base: default_max_position_size(),
            max_concurrent_positions: default_max_concurrent_positions(),
            risk_per_trade_pct: default_risk_per_trade_pct(),
        }
    }
}

/// Replay pacing relative to recorded block times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplaySpeed {
    #[serde(rename = "1x")]
    X1,
    #[serde(rename = "10x")]
    X10,
    #[serde(rename = "100x")]
    X100,
    #[serde(rename = "max")]
    Max,
}

impl ReplaySpeed {
    /// Wall-clock divisor; `None` means no pacing at all
    pub fn divisor(&self) -> Option<f64> {
        match self {
            ReplaySpeed::X1 => Some(1.0),
            ReplaySpeed::X10 => Some(10.0),
            ReplaySpeed::X100 => Some(100.0),
            ReplaySpeed::Max => None,
        }
    }
}

impl Default for ReplaySpeed {
    fn default() -> Self {
        ReplaySpeed::Max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub dataset_path: String,
    #[serde(default)]
    pub start_slot: Option<u64>,
    #[serde(default)]
    pub end_slot: Option<u64>,
    #[serde(default)]
    pub speed: ReplaySpeed,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_seed")]
    pub seed: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dataset_path: String::new(),
            start_slot: None,
            end_slot: None,
            speed: ReplaySpeed::default(),
            output_dir: default_output_dir(),
            seed: default_seed(),
        }
    }
}

/// Where the live feed of pre-parsed transactions comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Websocket,
    File,
    Stdin,
}

impl Default for FeedKind {
    fn default() -> Self {
        FeedKind::Websocket
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub feed: FeedKind,
    /// WebSocket endpoint for the transaction firehose
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// NDJSON file path when `feed = "file"`
    #[serde(default)]
    pub feed_path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Adaptive rate limit ceiling, requests per second
    #[serde(default = "default_max_requests_per_sec")]
    pub max_requests_per_sec: f64,
    /// Clear interval before the rate recovers
    #[serde(default = "default_rate_clear_interval_secs")]
    pub rate_clear_interval_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            feed: FeedKind::default(),
            feed_url: default_feed_url(),
            feed_path: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ping_interval_secs: default_ping_interval_secs(),
            max_requests_per_sec: default_max_requests_per_sec(),
            rate_clear_interval_secs: default_rate_clear_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_oracle_url")]
    pub base_url: String,
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_oracle_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_oracle_max_retries")]
    pub max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_oracle_url(),
            timeout_ms: default_oracle_timeout_ms(),
            cache_ttl_secs: default_oracle_cache_ttl_secs(),
            max_retries: default_oracle_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bounded queue capacity between stages
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Live reorder buffer depth, in slots
    #[serde(default = "default_reorder_depth_slots")]
    pub reorder_depth_slots: u64,
    /// LRU bound on the pool state store
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Live-mode watermark tick interval
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Recent signatures remembered for dedup
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            reorder_depth_slots: default_reorder_depth_slots(),
            pool_capacity: default_pool_capacity(),
            tick_interval_ms: default_tick_interval_ms(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

// Default value functions

fn default_min_sell_fraction() -> f64 {
    0.01
}

fn default_max_sell_fraction() -> f64 {
    0.15
}

fn default_absorption_window_slots() -> u64 {
    10
}

fn default_max_response_latency_slots() -> u64 {
    8
}

fn default_pre_event_price_window_secs() -> u64 {
    30
}

fn default_sell_retention_slots() -> u64 {
    2000
}

fn default_min_absorption() -> f64 {
    0.25
}

fn default_max_absorption() -> f64 {
    1.0
}

fn default_stabilization_window_slots() -> u64 {
    40
}

fn default_max_price_drop_pct() -> f64 {
    5.0
}

fn default_min_contraction_pct() -> f64 {
    20.0
}

fn default_new_low_tolerance() -> f64 {
    0.05
}

fn default_min_events() -> u32 {
    3
}

fn default_min_tokens() -> u32 {
    2
}

fn default_min_stabilization_rate() -> f64 {
    0.6
}

fn default_min_confidence() -> f64 {
    50.0
}

fn default_max_tracked_wallets() -> usize {
    10_000
}

fn default_max_evidence_per_wallet() -> usize {
    50
}

fn default_decay_days() -> f64 {
    7.0
}

fn default_decay_step() -> f64 {
    10.0
}

fn default_decay_interval_secs() -> u64 {
    3600
}

fn default_min_strength() -> f64 {
    60.0
}

fn default_latency_slots() -> u64 {
    2
}

fn default_slippage_model() -> SlippageModel {
    SlippageModel::Reserves
}

fn default_slippage_bps() -> f64 {
    50.0
}

fn default_quote_stale_prob() -> f64 {
    0.02
}

fn default_route_fail_prob() -> f64 {
    0.01
}

fn default_partial_fill_prob() -> f64 {
    0.05
}

fn default_partial_fill_ratio() -> f64 {
    0.5
}

fn default_lp_fee_bps() -> f64 {
    30.0
}

fn default_priority_fee() -> f64 {
    0.0001
}

fn default_starting_capital() -> f64 {
    100.0
}

fn default_max_position_size() -> f64 {
    5.0
}

fn default_max_concurrent_positions() -> usize {
    5
}

fn default_risk_per_trade_pct() -> f64 {
    2.0
}

fn default_output_dir() -> String {
    "runs".to_string()
}

fn default_seed() -> u32 {
    12345
}

fn default_feed_url() -> String {
    std::env::var("INFRAWATCH_FEED_URL").unwrap_or_else(|_| "ws://127.0.0.1:9944/firehose".into())
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_max_requests_per_sec() -> f64 {
    50.0
}

fn default_rate_clear_interval_secs() -> u64 {
    10
}

fn default_oracle_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_oracle_timeout_ms() -> u64 {
    5000
}

fn default_oracle_cache_ttl_secs() -> u64 {
    60
}

fn default_oracle_max_retries() -> u32 {
    3
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_reorder_depth_slots() -> u64 {
    4
}

fn default_pool_capacity() -> usize {
    4096
}

fn default_tick_interval_ms() -> u64 {
    400
}

fn default_dedup_capacity() -> usize {
    65_536
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix INFRAWATCH_)
            .add_source(
                config::Environment::with_prefix("INFRAWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values; fail fast at startup
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.min_sell_fraction)
            || !(0.0..=1.0).contains(&d.max_sell_fraction)
        {
            anyhow::bail!("sell fractions must be in [0, 1]");
        }
        if d.min_sell_fraction >= d.max_sell_fraction {
            anyhow::bail!(
                "min_sell_fraction {} must be below max_sell_fraction {}",
                d.min_sell_fraction,
                d.max_sell_fraction
            );
        }
        if d.absorption_window_slots == 0 {
            anyhow::bail!("absorption_window_slots must be positive");
        }

        let a = &self.absorption;
        if !(0.0..=1.0).contains(&a.min_absorption) || a.min_absorption >= a.max_absorption {
            anyhow::bail!(
                "absorption band [{}, {}] is invalid",
                a.min_absorption,
                a.max_absorption
            );
        }

        let s = &self.stabilization;
        if s.stabilization_window_slots == 0 {
            anyhow::bail!("stabilization_window_slots must be positive");
        }
        if !(0.0..1.0).contains(&s.new_low_tolerance) {
            anyhow::bail!("new_low_tolerance must be in [0, 1)");
        }

        let sc = &self.scoring;
        if sc.min_events == 0 {
            anyhow::bail!("min_events must be positive");
        }
        if !(0.0..=1.0).contains(&sc.min_stabilization_rate) {
            anyhow::bail!("min_stabilization_rate must be in [0, 1]");
        }
        if !(0.0..=100.0).contains(&sc.min_confidence) {
            anyhow::bail!("min_confidence must be in [0, 100]");
        }
        if sc.decay_days <= 0.0 || sc.decay_step < 0.0 {
            anyhow::bail!("decay_days must be positive and decay_step non-negative");
        }
        if sc.max_evidence_per_wallet == 0 {
            anyhow::bail!("max_evidence_per_wallet must be positive");
        }

        let e = self.execution.resolved();
        for (name, p) in [
            ("quote_stale_prob", e.quote_stale_prob),
            ("route_fail_prob", e.route_fail_prob),
            ("partial_fill_prob", e.partial_fill_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("{} must be in [0, 1]", name);
            }
        }
        if !(0.0..=1.0).contains(&e.partial_fill_ratio) {
            anyhow::bail!("partial_fill_ratio must be in [0, 1]");
        }

        let c = &self.capital;
        if c.starting_capital_base <= 0.0 {
            anyhow::bail!("starting_capital_base must be positive");
        }
        if c.max_position_size_base <= 0.0 || c.max_concurrent_positions == 0 {
            anyhow::bail!("position caps must be positive");
        }
        if !(0.0..=100.0).contains(&c.risk_per_trade_pct) {
            anyhow::bail!("risk_per_trade_pct must be in [0, 100]");
        }

        if self.pipeline.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be positive");
        }

        if !(0.0..=100.0).contains(&self.signals.min_strength) {
            anyhow::bail!("signals.min_strength must be in [0, 100]");
        }

        Ok(())
    }

    /// Get configuration summary for display (endpoints masked)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Detection:
    sell band: [{}, {}] of pool
    observation window: {} slots
    max response latency: {} slots
  Absorption:
    band: [{}, {}]
  Stabilization:
    window: {} slots
    max drop: {}%  min contraction: {}%
  Scoring:
    min events: {}  min tokens: {}  min rate: {}
    decay: -{} per {} days
  Execution:
    mode: {:?}  slippage: {:?} {}bps
  Capital:
    starting: {}  max position: {}  max concurrent: {}
  Feed:
    kind: {:?}
    url: {}
"#,
            self.detection.min_sell_fraction,
            self.detection.max_sell_fraction,
            self.detection.absorption_window_slots,
            self.detection.max_response_latency_slots,
            self.absorption.min_absorption,
            self.absorption.max_absorption,
            self.stabilization.stabilization_window_slots,
            self.stabilization.max_price_drop_pct,
            self.stabilization.min_contraction_pct,
            self.scoring.min_events,
            self.scoring.min_tokens,
            self.scoring.min_stabilization_rate,
            self.scoring.decay_step,
            self.scoring.decay_days,
            self.execution.mode,
            self.execution.slippage_model,
            self.execution.slippage_bps,
            self.capital.starting_capital_base,
            self.capital.max_position_size_base,
            self.capital.max_concurrent_positions,
            self.chain.feed,
            mask_url(&self.chain.feed_url),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            absorption: AbsorptionConfig::default(),
            stabilization: StabilizationConfig::default(),
            scoring: ScoringConfig::default(),
            signals: SignalConfig::default(),
            execution: ExecutionConfig::default(),
            capital: CapitalConfig::default(),
            replay: ReplayConfig::default(),
            chain: ChainConfig::default(),
            oracle: OracleConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

/// Check that a string plausibly is a base58 account address
pub fn looks_like_address(s: &str) -> bool {
    if s.len() < 32 || s.len() > 44 {
        return false;
    }
    bs58::decode(s).into_vec().map(|b| b.len() == 32).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.min_sell_fraction, 0.01);
        assert_eq!(config.scoring.max_evidence_per_wallet, 50);
    }

    #[test]
    fn test_invalid_band_rejected() {
        let mut config = Config::default();
        config.detection.min_sell_fraction = 0.2;
        config.detection.max_sell_fraction = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_execution_presets() {
        let mut cfg = ExecutionConfig::default();
        cfg.mode = ExecutionMode::Idealized;
        let r = cfg.resolved();
        assert_eq!(r.latency_slots, 0);
        assert_eq!(r.slippage_model, SlippageModel::None);
        assert_eq!(r.lp_fee_bps, 0.0);

        cfg.mode = ExecutionMode::Stress;
        let r = cfg.resolved();
        assert!(r.quote_stale_prob > 0.05);
        assert!(r.slippage_bps > 100.0);

        cfg.mode = ExecutionMode::Custom;
        cfg.latency_slots = 42;
        assert_eq!(cfg.resolved().latency_slots, 42);
    }

    #[test]
    fn test_replay_speed_serde() {
        let s: ReplaySpeed = serde_json::from_str(r#""10x""#).unwrap();
        assert_eq!(s, ReplaySpeed::X10);
        assert_eq!(s.divisor(), Some(10.0));
        let m: ReplaySpeed = serde_json::from_str(r#""max""#).unwrap();
        assert_eq!(m.divisor(), None);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("wss://feed.example.com?key=secret"),
            "wss://feed.example.com?***"
        );
        assert_eq!(mask_url("wss://feed.example.com"), "wss://feed.example.com");
    }

    #[test]
    fn test_looks_like_address() {
        assert!(looks_like_address("So11111111111111111111111111111111111111112"));
        assert!(!looks_like_address("short"));
        assert!(!looks_like_address("0x0000000000000000000000000000000000000000"));
    }
}
