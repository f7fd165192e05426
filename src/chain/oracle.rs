//! Market-data oracle contract and HTTP client
//!
//! USD price and liquidity context for tokens. The oracle may be missing or
//! stale; every consumer degrades to reserve-only metrics when it returns
//! `None`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::OracleConfig;

/// Oracle capability: best-effort USD context, never an error to consumers
#[async_trait]
pub trait MarketOracle: Send + Sync {
    async fn price_usd(&self, mint: &str) -> Option<f64>;
    async fn liquidity_usd(&self, mint: &str) -> Option<f64>;
}

/// Oracle that always declines; used when the oracle is disabled
pub struct NullOracle;

#[async_trait]
impl MarketOracle for NullOracle {
    async fn price_usd(&self, _mint: &str) -> Option<f64> {
        None
    }

    async fn liquidity_usd(&self, _mint: &str) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PairLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pair {
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    liquidity: Option<PairLiquidity>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenPairsResponse {
    pairs: Option<Vec<Pair>>,
}

#[derive(Clone)]
struct CachedQuote {
    price_usd: Option<f64>,
    liquidity_usd: Option<f64>,
    fetched_at: Instant,
}

impl CachedQuote {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// HTTP oracle client with a TTL cache and bounded retries
pub struct HttpOracle {
    client: reqwest::Client,
    config: OracleConfig,
    cache: DashMap<String, CachedQuote>,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            cache: DashMap::new(),
        }
    }

    pub fn shared(config: OracleConfig) -> Arc<dyn MarketOracle> {
        if config.enabled {
            Arc::new(Self::new(config))
        } else {
            Arc::new(NullOracle)
        }
    }

    async fn fetch(&self, mint: &str) -> Option<CachedQuote> {
        let url = format!("{}/latest/dex/tokens/{}", self.config.base_url, mint);

        let fetch_once = || async {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(e.to_string()))?;
            if resp.status().as_u16() == 429 {
                return Err(backoff::Error::transient("rate limited".to_string()));
            }
            resp.json::<TokenPairsResponse>()
                .await
                .map_err(|e| backoff::Error::permanent(e.to_string()))
        };

        let policy = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_millis(
                self.config.timeout_ms * self.config.max_retries.max(1) as u64,
            )))
            .build();

        let parsed = match backoff::future::retry(policy, fetch_once).await {
            Ok(p) => p,
            Err(e) => {
                warn!(mint = %mint, error = %e, "Oracle fetch failed, degrading");
                return None;
            }
        };

        let pair = parsed.pairs.as_ref().and_then(|p| p.first())?;
        let quote = CachedQuote {
            price_usd: pair.price_usd.as_deref().and_then(|s| s.parse().ok()),
            liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd),
            fetched_at: Instant::now(),
        };
        debug!(mint = %mint, price = ?quote.price_usd, "Oracle quote fetched");
        Some(quote)
    }

    async fn quote(&self, mint: &str) -> Option<CachedQuote> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Some(cached) = self.cache.get(mint) {
            if !cached.is_expired(ttl) {
                return Some(cached.clone());
            }
        }

        let fresh = self.fetch(mint).await?;
        self.cache.insert(mint.to_string(), fresh.clone());
        Some(fresh)
    }
}

#[async_trait]
impl MarketOracle for HttpOracle {
    async fn price_usd(&self, mint: &str) -> Option<f64> {
        self.quote(mint).await.and_then(|q| q.price_usd)
    }

    async fn liquidity_usd(&self, mint: &str) -> Option<f64> {
        self.quote(mint).await.and_then(|q| q.liquidity_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_oracle_declines() {
        let oracle = NullOracle;
        assert_eq!(oracle.price_usd("mint").await, None);
        assert_eq!(oracle.liquidity_usd("mint").await, None);
    }

    #[test]
    fn test_pairs_response_parsing() {
        let json = r#"{"pairs":[{"priceUsd":"0.0123","liquidity":{"usd":45000.5}}]}"#;
        let parsed: TokenPairsResponse = serde_json::from_str(json).unwrap();
        let pair = &parsed.pairs.unwrap()[0];
        assert_eq!(pair.price_usd.as_deref(), Some("0.0123"));
        assert_eq!(pair.liquidity.as_ref().unwrap().usd, Some(45000.5));
    }

    #[test]
    fn test_cached_quote_expiry() {
        let quote = CachedQuote {
            price_usd: Some(1.0),
            liquidity_usd: None,
            fetched_at: Instant::now() - Duration::from_secs(120),
        };
        assert!(quote.is_expired(Duration::from_secs(60)));
        assert!(!quote.is_expired(Duration::from_secs(600)));
    }
}
