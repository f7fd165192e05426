//! Command implementations

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::oracle::HttpOracle;
use crate::chain::{NdjsonSource, TransactionSource, WsFeed};
use crate::clock::{Clock, LiveClock};
use crate::config::{Config, FeedKind};
use crate::ingest::instruction::{PUMP_SWAP_PROGRAM_ID, RAYDIUM_AMM_PROGRAM_ID};
use crate::ingest::OrderingMode;
use crate::pipeline::{IngestMsg, Pipeline, SignalUpdate};
use crate::sandbox;

/// Run a replay from the configured dataset
pub async fn replay(config: &Config) -> Result<()> {
    let outcome = sandbox::run_replay(config).await?;

    let summary = &outcome.report.summary;
    info!(
        trades = summary.total_trades,
        net_pnl = summary.net_pnl,
        win_rate = summary.win_rate_pct,
        signals = summary.pipeline.signals_emitted,
        "Replay complete"
    );
    if let Some(dir) = &outcome.run_dir {
        info!("Artifacts written to {}", dir.display());
    }
    Ok(())
}

/// Run the live pipeline until interrupted
pub async fn live(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::spawn(config, OrderingMode::BestEffort, cancel.clone());
    let clock = Arc::new(LiveClock::new());

    // Watermark ticker: closes windows on tokens that went quiet
    {
        let ingest_tx = pipeline.ingest_tx.clone();
        let clock = Arc::clone(&clock);
        let cancel = cancel.clone();
        let interval = std::time::Duration::from_millis(config.pipeline.tick_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let msg = IngestMsg::Tick {
                            slot: clock.current_slot(),
                            time: clock.now(),
                        };
                        if ingest_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // Feed: raw transactions into the normalizer
    let programs = vec![
        RAYDIUM_AMM_PROGRAM_ID.to_string(),
        PUMP_SWAP_PROGRAM_ID.to_string(),
    ];
    let mut ws_feed: Option<WsFeed> = None;
    let feed_handle = match config.chain.feed {
        FeedKind::Websocket => {
            let (raw_tx, raw_rx) = async_channel::bounded(config.pipeline.channel_capacity);
            let feed = WsFeed::new(config.chain.clone(), raw_tx);
            feed.start(programs);
            ws_feed = Some(feed);

            let ingest_tx = pipeline.ingest_tx.clone();
            let clock = Arc::clone(&clock);
            tokio::spawn(async move {
                while let Ok(raw) = raw_rx.recv().await {
                    clock.observe_slot(raw.slot);
                    if ingest_tx.send(IngestMsg::Raw(Box::new(raw))).await.is_err() {
                        break;
                    }
                }
            })
        }
        FeedKind::File | FeedKind::Stdin => {
            let source: Box<dyn TransactionSource> = match config.chain.feed {
                FeedKind::File => Box::new(NdjsonSource::open(&config.chain.feed_path).await?),
                _ => Box::new(NdjsonSource::stdin()),
            };
            let ingest_tx = pipeline.ingest_tx.clone();
            let clock = Arc::clone(&clock);
            let stats = Arc::clone(&pipeline.stats);
            tokio::spawn(async move {
                let mut source = source;
                while let Some(next) = source.next_transaction().await {
                    match next {
                        Ok(raw) => {
                            clock.observe_slot(raw.slot);
                            if ingest_tx.send(IngestMsg::Raw(Box::new(raw))).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            stats
                                .feed_errors
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            warn!(error = %e, "Feed item dropped");
                        }
                    }
                }
                let _ = ingest_tx.send(IngestMsg::Eof).await;
            })
        }
    };

    // Signal consumer: in live mode signals are the product; log them with
    // USD context from the oracle when it answers
    let signal_rx = pipeline.signal_rx.clone();
    let oracle = HttpOracle::shared(config.oracle.clone());
    let consumer = tokio::spawn(async move {
        while let Ok(update) = signal_rx.recv().await {
            match update {
                SignalUpdate::Created(signal) => {
                    let liquidity_usd = oracle.liquidity_usd(&signal.token_mint).await;
                    info!(
                        token = %signal.token_mint,
                        wallet = %signal.absorber_wallet,
                        strength = format!("{:.1}", signal.strength),
                        defended_price = format!("{:.8}", signal.defended_price),
                        liquidity_usd = ?liquidity_usd,
                        "SIGNAL active"
                    );
                }
                SignalUpdate::Resolved(signal) => {
                    info!(
                        token = %signal.token_mint,
                        status = ?signal.status,
                        "SIGNAL resolved"
                    );
                }
                SignalUpdate::Price { .. } => {}
                SignalUpdate::Eof => break,
            }
        }
    });

    info!("Live pipeline running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested; draining pipeline");
    cancel.cancel();
    if let Some(feed) = &ws_feed {
        feed.stop();
    }

    feed_handle.abort();
    let stats = Arc::clone(&pipeline.stats);
    let pools = Arc::clone(&pipeline.pools);
    if let Err(e) = pipeline.join().await {
        error!("Pipeline ended with error: {}", e);
    }
    let _ = consumer.await;

    let snapshot = stats.snapshot();
    info!(
        swaps = snapshot.swaps_normalized,
        sells = snapshot.sells_detected,
        signals = snapshot.signals_emitted,
        confirmed = snapshot.signals_confirmed,
        pools_tracked = pools.len(),
        "Live session finished"
    );
    Ok(())
}

/// Print the configuration with secrets masked
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Validate a recorded dataset without running it
pub fn validate_dataset(path: &str) -> Result<()> {
    let dataset = sandbox::load_dataset(Path::new(path), None, None)?;
    println!(
        "{}: {} events, slots {:?}..{:?}",
        path,
        dataset.len(),
        dataset.first_slot,
        dataset.last_slot
    );
    Ok(())
}
