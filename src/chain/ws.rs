//! WebSocket transaction firehose client
//!
//! Connects to an external decoder service that streams parsed
//! transactions as JSON messages, one `RawTransaction` per text frame.
//! Handles reconnect with bounded attempts, keepalive pings, and adaptive
//! rate limiting on the subscription request.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{RateLimiter, RawTransaction};
use crate::config::ChainConfig;
use crate::error::{Error, Result};

/// Subscription request sent after connecting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMessage {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub programs: Option<Vec<String>>,
}

impl SubscriptionMessage {
    /// Subscribe to parsed transactions touching the given programs
    pub fn subscribe_transactions(programs: Vec<String>) -> Self {
        Self {
            method: "subscribeTransactions".to_string(),
            programs: Some(programs),
        }
    }
}

/// WebSocket feed task handle
pub struct WsFeed {
    config: ChainConfig,
    tx: async_channel::Sender<RawTransaction>,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

impl WsFeed {
    pub fn new(config: ChainConfig, tx: async_channel::Sender<RawTransaction>) -> Self {
        let (shutdown, _) = tokio::sync::broadcast::channel(1);
        Self {
            config,
            tx,
            shutdown,
        }
    }

    /// Signal the feed task to stop after the current read
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Start the connection loop on a background task
    pub fn start(&self, programs: Vec<String>) {
        info!(url = %self.config.feed_url, "Starting transaction feed");

        let config = self.config.clone();
        let tx = self.tx.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut reconnect_attempts = 0u32;
            let mut limiter = RateLimiter::new(
                config.max_requests_per_sec,
                Duration::from_secs(config.rate_clear_interval_secs),
            );

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!("Transaction feed shutting down");
                    break;
                }

                limiter.acquire().await;
                match Self::connect_and_stream(&config, &tx, &programs).await {
                    Ok(()) => {
                        reconnect_attempts = 0;
                        limiter.on_success();
                    }
                    Err(e) => {
                        if e.to_string().contains("429") {
                            limiter.on_throttle();
                            warn!(rate = limiter.rate(), "Feed throttled, rate halved");
                        }
                        error!("Feed error: {}", e);
                        reconnect_attempts += 1;

                        if config.max_reconnect_attempts > 0
                            && reconnect_attempts >= config.max_reconnect_attempts
                        {
                            error!(
                                "Max reconnect attempts ({}) reached",
                                config.max_reconnect_attempts
                            );
                            break;
                        }
                    }
                }

                let delay = Duration::from_millis(config.reconnect_delay_ms);
                warn!("Reconnecting in {:?}...", delay);
                sleep(delay).await;
            }
        });
    }

    async fn connect_and_stream(
        config: &ChainConfig,
        tx: &async_channel::Sender<RawTransaction>,
        programs: &[String],
    ) -> Result<()> {
        let (ws, _) = connect_async(config.feed_url.as_str())
            .await
            .map_err(|e| Error::FeedConnection(e.to_string()))?;
        info!("Feed connected");

        let (mut write, mut read) = ws.split();

        let sub = SubscriptionMessage::subscribe_transactions(programs.to_vec());
        let payload = serde_json::to_string(&sub)?;
        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| Error::FeedConnection(format!("subscribe: {}", e)))?;

        let mut ping = tokio::time::interval(Duration::from_secs(config.ping_interval_secs));
        ping.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(vec![]))
                        .await
                        .map_err(|e| Error::FeedConnection(format!("ping: {}", e)))?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<RawTransaction>(&text) {
                                Ok(raw) => {
                                    // Bounded channel: blocks when the
                                    // normalizer falls behind (backpressure)
                                    if tx.send(raw).await.is_err() {
                                        debug!("Pipeline closed, dropping feed");
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    debug!(error = %e, "Undecodable feed frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| Error::FeedConnection(format!("pong: {}", e)))?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(Error::FeedDisconnected);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(Error::FeedConnection(e.to_string()));
                        }
                    }
                }
            }
        }
    }
}
