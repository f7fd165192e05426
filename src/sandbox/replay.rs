//! Replay driver
//!
//! Re-drives the full pipeline from a recorded dataset at a controlled
//! pace, runs the virtual trading loop off the emitted signals, and
//! produces the report artifacts. Replay is strict: determinism
//! violations abort the run with a non-zero exit, and they are still
//! recorded in the report.

use chrono::{DateTime, Utc};
use crate::clock::Clock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::ReplayClock;
use crate::config::Config;
use crate::error::Result;
use crate::events::{Side, SignalStatus, Slot};
use crate::ingest::OrderingMode;
use crate::pipeline::{IngestMsg, Pipeline, SignalUpdate};
use crate::sandbox::dataset::{load_dataset, Dataset};
use crate::sandbox::fill::{FillFailure, FillSimulator, PoolHistory};
use crate::sandbox::portfolio::{ExitReason, VirtualPortfolio};
use crate::sandbox::report::{
    trade_stats, FillFailureCounts, MarketCoverage, ReportWriter, RunReport, Summary,
};

/// Result of a replay run
pub struct ReplayOutcome {
    pub report: RunReport,
    pub run_dir: Option<PathBuf>,
}

/// Run a replay from the configured dataset path and write artifacts
pub async fn run(config: &Config) -> Result<ReplayOutcome> {
    let dataset = load_dataset(
        Path::new(&config.replay.dataset_path),
        config.replay.start_slot,
        config.replay.end_slot,
    )?;
    info!(
        events = dataset.len(),
        first = ?dataset.first_slot,
        last = ?dataset.last_slot,
        "Dataset loaded"
    );

    let run_dir = PathBuf::from(&config.replay.output_dir).join(format!(
        "run-{}-{}-seed{}",
        dataset.first_slot.unwrap_or(0),
        dataset.last_slot.unwrap_or(0),
        config.replay.seed
    ));
    run_dataset(config, dataset, Some(&run_dir)).await
}

/// Latest observed trade state per token
#[derive(Clone, Copy)]
struct LastPrice {
    price: f64,
    slot: Slot,
    time: DateTime<Utc>,
}

/// Drive a loaded dataset through the pipeline and the virtual trader
pub async fn run_dataset(
    config: &Config,
    dataset: Dataset,
    output_dir: Option<&Path>,
) -> Result<ReplayOutcome> {
    let execution = config.execution.resolved();

    // The fill simulator consults recorded history, not the live store
    let mut history = PoolHistory::new();
    for event in &dataset.events {
        history.record(event.pool_state.clone());
    }

    let clock = Arc::new(ReplayClock::new());
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::spawn(config, OrderingMode::Strict, cancel.clone());

    let events_loaded = dataset.len();
    let first_slot = dataset.first_slot;
    let last_slot = dataset.last_slot;

    // Feeder: advance the replay clock, pace against recorded block times,
    // push events in canonical order, then signal EOF
    let feeder = {
        let ingest_tx = pipeline.ingest_tx.clone();
        let clock = Arc::clone(&clock);
        let divisor = config.replay.speed.divisor();
        tokio::spawn(async move {
            let mut previous_time: Option<DateTime<Utc>> = None;
            for event in dataset.events {
                if let (Some(divisor), Some(prev)) = (divisor, previous_time) {
                    let gap = (event.block_time - prev).num_milliseconds().max(0) as u64;
                    let paced = (gap as f64 / divisor) as u64;
                    if paced > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(paced)).await;
                    }
                }
                previous_time = Some(event.block_time);
                clock.advance(event.key.slot, event.block_time);
                if ingest_tx
                    .send(IngestMsg::Recorded(Box::new(event)))
                    .await
                    .is_err()
                {
                    // Pipeline aborted; stop feeding
                    return;
                }
                // Watermark off the replay clock; drives window closure and
                // decay at deterministic times
                let tick = IngestMsg::Tick {
                    slot: clock.current_slot(),
                    time: clock.now(),
                };
                if ingest_tx.send(tick).await.is_err() {
                    return;
                }
            }
            let _ = ingest_tx.send(IngestMsg::Eof).await;
        })
    };

    // Virtual trading loop: signals in, fills and positions out
    let mut simulator = FillSimulator::new(execution.clone(), config.replay.seed);
    let mut portfolio = VirtualPortfolio::new(config.capital.clone());
    let mut fill_failures = FillFailureCounts::default();
    let mut last_prices: BTreeMap<String, LastPrice> = BTreeMap::new();

    while let Ok(update) = pipeline.signal_rx.recv().await {
        match update {
            SignalUpdate::Price {
                token_mint,
                price,
                slot,
                time,
            } => {
                last_prices.insert(token_mint.clone(), LastPrice { price, slot, time });
                portfolio.update_price(&token_mint, price, slot, time);
            }
            SignalUpdate::Created(signal) => {
                let size = portfolio.allowed_entry_size();
                if size <= 0.0 {
                    continue;
                }
                match simulator.fill(
                    Side::Buy,
                    size,
                    &signal.pool_address,
                    signal.created_slot,
                    &history,
                ) {
                    Ok(fill) => {
                        let opened = portfolio.open_position(
                            &signal.trigger_sell_event_id,
                            &signal.token_mint,
                            &signal.pool_address,
                            &signal.absorber_wallet,
                            signal.strength,
                            &fill,
                            signal.created_at,
                        );
                        if let Err(e) = opened {
                            debug!(id = %signal.trigger_sell_event_id, error = %e, "Entry rejected");
                        }
                    }
                    Err(failure) => {
                        count_failure(&mut fill_failures, failure);
                        debug!(id = %signal.trigger_sell_event_id, %failure, "Entry fill failed");
                    }
                }
            }
            SignalUpdate::Resolved(signal) => {
                let id = signal.trigger_sell_event_id.clone();
                let Some(position) = portfolio.position(&id) else {
                    continue;
                };

                let reason = match signal.status {
                    SignalStatus::Confirmed => ExitReason::StabilizationConfirmed,
                    SignalStatus::Expired => ExitReason::SignalExpired,
                    _ => ExitReason::SignalInvalidated,
                };

                let last = last_prices.get(&signal.token_mint).copied();
                let mark = last.map(|l| l.price).unwrap_or(position.current_price);
                let exit_slot = last.map(|l| l.slot).unwrap_or(position.entry_slot);
                let exit_time = last.map(|l| l.time).unwrap_or(position.entry_time);
                let exit_value = position.token_amount * mark;

                match simulator.fill(
                    Side::Sell,
                    exit_value,
                    &signal.pool_address,
                    exit_slot,
                    &history,
                ) {
                    Ok(fill) => {
                        let _ = portfolio.close_position(
                            &id,
                            fill.fill_price,
                            fill.slippage_bps,
                            fill.fees_base,
                            fill.execution_slot,
                            exit_time,
                            reason,
                        );
                    }
                    Err(failure) => {
                        // Exits must be total: fall back to marking out at
                        // the last observed price, free of fees
                        count_failure(&mut fill_failures, failure);
                        warn!(id = %id, %failure, "Exit fill failed, marking out");
                        let _ = portfolio
                            .close_position(&id, mark, 0.0, 0.0, exit_slot, exit_time, reason);
                    }
                }
            }
            SignalUpdate::Eof => break,
        }
    }

    // Liquidate whatever is still open at the end of data
    for id in portfolio.open_position_ids() {
        let position = match portfolio.position(&id) {
            Some(p) => p.clone(),
            None => continue,
        };
        let last = last_prices.get(&position.token_mint).copied();
        let mark = last.map(|l| l.price).unwrap_or(position.current_price);
        let exit_slot = last.map(|l| l.slot).unwrap_or(position.entry_slot);
        let exit_time = last.map(|l| l.time).unwrap_or(position.entry_time);
        let _ = portfolio.close_position(
            &id,
            mark,
            0.0,
            0.0,
            exit_slot,
            exit_time,
            ExitReason::EndOfData,
        );
    }

    let _ = feeder.await;

    let stats = Arc::clone(&pipeline.stats);
    let scorer = Arc::clone(&pipeline.scorer);
    let join_result = pipeline.join().await;

    let residual = portfolio.reconciliation_residual();
    if residual.abs() > 1e-6 {
        warn!(residual, "Portfolio reconciliation drift");
    }

    let trades = portfolio.closed_trades().to_vec();
    let (total, winners, win_rate, avg_holding, expectancy, sharpe) = trade_stats(&trades);

    let mut tokens_traded: Vec<String> = trades.iter().map(|t| t.token_mint.clone()).collect();
    tokens_traded.sort();
    tokens_traded.dedup();

    let snapshot = stats.snapshot();
    let summary = Summary {
        dataset_path: config.replay.dataset_path.clone(),
        seed: config.replay.seed,
        execution_mode: format!("{:?}", execution.mode).to_lowercase(),
        speed: format!("{:?}", config.replay.speed).to_lowercase(),
        first_slot,
        last_slot,
        events_loaded,
        starting_capital: portfolio.starting_capital(),
        final_capital: portfolio.capital(),
        net_pnl: portfolio.realized_pnl(),
        total_fees: portfolio.total_fees(),
        total_trades: total,
        winning_trades: winners,
        losing_trades: total - winners,
        win_rate_pct: win_rate,
        avg_holding_slots: avg_holding,
        expectancy,
        sharpe,
        max_drawdown_base: portfolio.max_drawdown().0,
        max_drawdown_pct: portfolio.max_drawdown().1,
        fill_failures,
        market_coverage: MarketCoverage {
            tokens_traded,
            pools_seen: history.pools(),
            events_processed: snapshot.swaps_normalized,
            sells_detected: snapshot.sells_detected,
            windows_finalized: snapshot.windows_finalized,
        },
        pipeline: snapshot,
        equity_curve: portfolio.equity_curve().to_vec(),
        drawdown_curve: portfolio.drawdown_curve().to_vec(),
    };

    let report = RunReport {
        summary,
        trades,
        wallets: scorer.snapshot(),
    };

    let run_dir = match output_dir {
        Some(dir) => {
            let writer = ReportWriter::new(dir);
            Some(writer.write(&report)?)
        }
        None => None,
    };

    // A determinism violation surfaces after the report is on disk
    join_result?;

    Ok(ReplayOutcome { report, run_dir })
}

fn count_failure(counts: &mut FillFailureCounts, failure: FillFailure) {
    match failure {
        FillFailure::QuoteStale => counts.quote_stale += 1,
        FillFailure::RouteFail => counts.route_fail += 1,
        FillFailure::SlippageExceeded => counts.slippage_exceeded += 1,
    }
}
