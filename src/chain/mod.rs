//! External chain-facing contracts
//!
//! The pipeline never talks to an RPC node or signs anything. It consumes a
//! firehose of pre-parsed transactions through [`TransactionSource`] and
//! asks a [`oracle::MarketOracle`] for USD context. Both are contracts;
//! the shipped implementations are an NDJSON reader and a WebSocket client.

pub mod oracle;
pub mod source;
pub mod ws;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub use source::{NdjsonSource, TransactionSource};
pub use ws::WsFeed;

/// One instruction of a parsed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInstruction {
    pub program_id: String,
    /// Ordered account list, layout defined per program
    pub accounts: Vec<String>,
    /// Opaque encoded instruction data
    #[serde(default)]
    pub data: String,
    /// 0 for top-level instructions, 1.. for inner instructions
    #[serde(default)]
    pub inner_index: u32,
}

/// Pre/post balance of one token account touched by a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Token account address
    pub account: String,
    /// Owner of the token account
    pub owner: String,
    pub mint: String,
    pub pre_amount: f64,
    pub post_amount: f64,
}

impl TokenBalance {
    pub fn delta(&self) -> f64 {
        self.post_amount - self.pre_amount
    }
}

/// A parsed transaction as delivered by the feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    #[serde(default)]
    pub tx_index: u32,
    pub instructions: Vec<RawInstruction>,
    pub token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Adaptive rate limiter for feed subscriptions.
///
/// On a throttle response the rate halves; after a clear interval without
/// throttling it recovers by 10% per acquisition up to the configured
/// ceiling.
pub struct RateLimiter {
    rate_per_sec: f64,
    max_rate_per_sec: f64,
    clear_interval: Duration,
    last_throttle: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_rate_per_sec: f64, clear_interval: Duration) -> Self {
        Self {
            rate_per_sec: max_rate_per_sec,
            max_rate_per_sec,
            clear_interval,
            last_throttle: None,
        }
    }

    /// Current rate, requests per second
    pub fn rate(&self) -> f64 {
        self.rate_per_sec
    }

    /// Record a throttle response from the feed
    pub fn on_throttle(&mut self) {
        self.rate_per_sec = (self.rate_per_sec * 0.5).max(0.1);
        self.last_throttle = Some(Instant::now());
    }

    /// Record a successful request; recovers the rate after a clear interval
    pub fn on_success(&mut self) {
        let clear = self
            .last_throttle
            .map(|t| t.elapsed() >= self.clear_interval)
            .unwrap_or(true);
        if clear {
            self.rate_per_sec = (self.rate_per_sec * 1.1).min(self.max_rate_per_sec);
        }
    }

    /// Wait long enough to respect the current rate
    pub async fn acquire(&self) {
        let wait = Duration::from_secs_f64(1.0 / self.rate_per_sec);
        tokio::time::sleep(wait).await;
    }
}
