//! Pipeline wiring
//!
//! One task per long-running component, connected by bounded channels.
//! Producers block when a consumer falls behind; that is the backpressure
//! contract. `Tick` and `Eof` control messages flow through every stage so
//! observation and stabilization windows close off the slot watermark
//! rather than wall time.
//!
//! Determinism: the scoring stage derives every timestamp from the message
//! stream (block times and tick times), never from the clock directly, so
//! identical input always produces identical output regardless of task
//! scheduling.

pub mod absorption;
pub mod detector;
pub mod stabilization;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::RawTransaction;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{FinalizedSell, SellEvent, Signal, Slot, SwapEvent, ValidatedSell};
use crate::ingest::{OrderingMode, ReorderBuffer, SwapNormalizer};
use crate::pool::PoolStateStore;
use crate::scorer::WalletScorer;
use crate::signal::SignalBook;

use absorption::AbsorptionAnalyzer;
use detector::LargeSellDetector;
use stabilization::StabilizationValidator;

/// Shared pipeline counters; surfaced in logs and the final report
#[derive(Default)]
pub struct PipelineStats {
    pub swaps_normalized: AtomicU64,
    pub invalid_swaps: AtomicU64,
    pub duplicate_signatures: AtomicU64,
    pub unknown_programs: AtomicU64,
    pub invalid_pool_state: AtomicU64,
    pub out_of_order_dropped: AtomicU64,
    pub sells_detected: AtomicU64,
    pub windows_finalized: AtomicU64,
    pub late_buys_dropped: AtomicU64,
    pub sells_validated: AtomicU64,
    pub sells_stabilized: AtomicU64,
    pub signals_emitted: AtomicU64,
    pub signals_confirmed: AtomicU64,
    pub signals_expired: AtomicU64,
    pub signals_invalidated: AtomicU64,
    pub feed_errors: AtomicU64,
    fatal: Mutex<Option<String>>,
}

/// Plain-value copy of the counters for serialization
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub swaps_normalized: u64,
    pub invalid_swaps: u64,
    pub duplicate_signatures: u64,
    pub unknown_programs: u64,
    pub invalid_pool_state: u64,
    pub out_of_order_dropped: u64,
    pub sells_detected: u64,
    pub windows_finalized: u64,
    pub late_buys_dropped: u64,
    pub sells_validated: u64,
    pub sells_stabilized: u64,
    pub signals_emitted: u64,
    pub signals_confirmed: u64,
    pub signals_expired: u64,
    pub signals_invalidated: u64,
    pub feed_errors: u64,
    pub fatal: Option<String>,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            swaps_normalized: self.swaps_normalized.load(Ordering::Relaxed),
            invalid_swaps: self.invalid_swaps.load(Ordering::Relaxed),
            duplicate_signatures: self.duplicate_signatures.load(Ordering::Relaxed),
            unknown_programs: self.unknown_programs.load(Ordering::Relaxed),
            invalid_pool_state: self.invalid_pool_state.load(Ordering::Relaxed),
            out_of_order_dropped: self.out_of_order_dropped.load(Ordering::Relaxed),
            sells_detected: self.sells_detected.load(Ordering::Relaxed),
            windows_finalized: self.windows_finalized.load(Ordering::Relaxed),
            late_buys_dropped: self.late_buys_dropped.load(Ordering::Relaxed),
            sells_validated: self.sells_validated.load(Ordering::Relaxed),
            sells_stabilized: self.sells_stabilized.load(Ordering::Relaxed),
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            signals_confirmed: self.signals_confirmed.load(Ordering::Relaxed),
            signals_expired: self.signals_expired.load(Ordering::Relaxed),
            signals_invalidated: self.signals_invalidated.load(Ordering::Relaxed),
            feed_errors: self.feed_errors.load(Ordering::Relaxed),
            fatal: self.fatal(),
        }
    }

    pub fn set_fatal(&self, message: String) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if fatal.is_none() {
            *fatal = Some(message);
        }
    }

    pub fn fatal(&self) -> Option<String> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Route a per-event drop into the right counter
    fn count_drop(&self, error: &Error) {
        match error {
            Error::DuplicateSignature(_) => {
                self.duplicate_signatures.fetch_add(1, Ordering::Relaxed)
            }
            Error::UnknownProgram(_) => self.unknown_programs.fetch_add(1, Ordering::Relaxed),
            Error::InvalidPoolState { .. } => {
                self.invalid_pool_state.fetch_add(1, Ordering::Relaxed)
            }
            _ => self.invalid_swaps.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Input to the normalizer stage
#[derive(Debug)]
pub enum IngestMsg {
    /// A raw transaction from the live feed
    Raw(Box<RawTransaction>),
    /// An already-canonical event from the recorded dataset
    Recorded(Box<SwapEvent>),
    /// Watermark: no event will arrive with a smaller slot
    Tick { slot: Slot, time: DateTime<Utc> },
    Eof,
}

#[derive(Debug)]
enum DetectorIn {
    Swap(SwapEvent),
    Tick { slot: Slot, time: DateTime<Utc> },
    Eof,
}

#[derive(Debug)]
enum AnalyzerIn {
    Swap(SwapEvent),
    Sell(SellEvent),
    Tick { slot: Slot, time: DateTime<Utc> },
    Eof,
}

#[derive(Debug)]
enum ValidatorIn {
    Swap(SwapEvent),
    Finalized(FinalizedSell),
    Tick { slot: Slot, time: DateTime<Utc> },
    Eof,
}

#[derive(Debug)]
enum ScoringIn {
    Price {
        token_mint: String,
        price: f64,
        slot: Slot,
        time: DateTime<Utc>,
    },
    WindowClosed(FinalizedSell),
    Validated(ValidatedSell),
    Tick { time: DateTime<Utc> },
    Eof,
}

/// Output of the pipeline, consumed by the live runner or the sandbox
#[derive(Debug, Clone)]
pub enum SignalUpdate {
    Created(Signal),
    Resolved(Signal),
    /// Latest trade price on a token, for position marking
    Price {
        token_mint: String,
        price: f64,
        slot: Slot,
        time: DateTime<Utc>,
    },
    Eof,
}

/// Running pipeline handle
pub struct Pipeline {
    pub ingest_tx: async_channel::Sender<IngestMsg>,
    pub signal_rx: async_channel::Receiver<SignalUpdate>,
    pub stats: Arc<PipelineStats>,
    pub scorer: Arc<WalletScorer>,
    pub pools: Arc<PoolStateStore>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn all stage tasks and connect them with bounded queues
    pub fn spawn(config: &Config, ordering: OrderingMode, cancel: CancellationToken) -> Self {
        let cap = config.pipeline.channel_capacity;
        let stats = Arc::new(PipelineStats::default());
        let pools = Arc::new(PoolStateStore::new(config.pipeline.pool_capacity));
        let scorer = Arc::new(WalletScorer::new(
            config.scoring.clone(),
            config.detection.max_response_latency_slots,
        ));

        let (ingest_tx, ingest_rx) = async_channel::bounded::<IngestMsg>(cap);
        let (detector_tx, detector_rx) = async_channel::bounded::<DetectorIn>(cap);
        let (analyzer_tx, analyzer_rx) = async_channel::bounded::<AnalyzerIn>(cap);
        let (validator_tx, validator_rx) = async_channel::bounded::<ValidatorIn>(cap);
        let (scoring_tx, scoring_rx) = async_channel::bounded::<ScoringIn>(cap);
        let (signal_tx, signal_rx) = async_channel::bounded::<SignalUpdate>(cap);

        let mut handles = Vec::new();

        handles.push(tokio::spawn(normalizer_task(
            config.pipeline.dedup_capacity,
            config.pipeline.reorder_depth_slots,
            ordering,
            ingest_rx,
            detector_tx,
            Arc::clone(&pools),
            Arc::clone(&stats),
            cancel.clone(),
        )));

        handles.push(tokio::spawn(detector_task(
            config.clone(),
            detector_rx,
            analyzer_tx,
            Arc::clone(&stats),
            cancel.clone(),
        )));

        handles.push(tokio::spawn(analyzer_task(
            config.clone(),
            analyzer_rx,
            validator_tx,
            Arc::clone(&stats),
            cancel.clone(),
        )));

        handles.push(tokio::spawn(validator_task(
            config.clone(),
            validator_rx,
            scoring_tx,
            Arc::clone(&stats),
            cancel.clone(),
        )));

        handles.push(tokio::spawn(scoring_task(
            config.clone(),
            scoring_rx,
            signal_tx,
            Arc::clone(&scorer),
            Arc::clone(&stats),
            cancel.clone(),
        )));

        Self {
            ingest_tx,
            signal_rx,
            stats,
            scorer,
            pools,
            handles,
        }
    }

    /// Wait for every stage to finish; surfaces a fatal determinism
    /// violation as an error.
    pub async fn join(self) -> Result<()> {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Pipeline task panicked: {}", e);
            }
        }
        match self.stats.fatal() {
            Some(message) => Err(Error::Determinism(message)),
            None => Ok(()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn normalizer_task(
    dedup_capacity: usize,
    reorder_depth: u64,
    ordering: OrderingMode,
    rx: async_channel::Receiver<IngestMsg>,
    tx: async_channel::Sender<DetectorIn>,
    pools: Arc<PoolStateStore>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut normalizer = SwapNormalizer::new(dedup_capacity);
    let mut reorder = ReorderBuffer::new(ordering, reorder_depth);

    let admit = |event: SwapEvent,
                 reorder: &mut ReorderBuffer,
                 normalizer: &mut SwapNormalizer|
     -> Result<Vec<SwapEvent>> {
        let event = normalizer.admit_recorded(event)?;
        reorder.push(event)
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match msg {
                    IngestMsg::Raw(raw) => {
                        let normalized = normalizer.normalize(&raw);
                        match normalized.and_then(|e| reorder.push(e)) {
                            Ok(ready) => {
                                for event in ready {
                                    pools.record(event.pool_state.clone());
                                    stats.swaps_normalized.fetch_add(1, Ordering::Relaxed);
                                    if tx.send(DetectorIn::Swap(event)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) if e.is_fatal() => {
                                stats.set_fatal(e.to_string());
                                cancel.cancel();
                                break;
                            }
                            Err(e) => {
                                debug!(error = %e, "Dropped raw transaction");
                                stats.count_drop(&e);
                            }
                        }
                    }
                    IngestMsg::Recorded(event) => {
                        match admit(*event, &mut reorder, &mut normalizer) {
                            Ok(ready) => {
                                for event in ready {
                                    pools.record(event.pool_state.clone());
                                    stats.swaps_normalized.fetch_add(1, Ordering::Relaxed);
                                    if tx.send(DetectorIn::Swap(event)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) if e.is_fatal() => {
                                error!(error = %e, "Determinism violation, aborting");
                                stats.set_fatal(e.to_string());
                                cancel.cancel();
                                break;
                            }
                            Err(e) => {
                                debug!(error = %e, "Dropped recorded event");
                                stats.count_drop(&e);
                            }
                        }
                    }
                    IngestMsg::Tick { slot, time } => {
                        if tx.send(DetectorIn::Tick { slot, time }).await.is_err() {
                            return;
                        }
                    }
                    IngestMsg::Eof => {
                        for event in reorder.flush() {
                            pools.record(event.pool_state.clone());
                            stats.swaps_normalized.fetch_add(1, Ordering::Relaxed);
                            if tx.send(DetectorIn::Swap(event)).await.is_err() {
                                return;
                            }
                        }
                        let _ = tx.send(DetectorIn::Eof).await;
                        break;
                    }
                }
            }
        }
    }
    stats
        .out_of_order_dropped
        .fetch_add(reorder.dropped(), Ordering::Relaxed);
    debug!("Normalizer stage stopped");
}

async fn detector_task(
    config: Config,
    rx: async_channel::Receiver<DetectorIn>,
    tx: async_channel::Sender<AnalyzerIn>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut detector = LargeSellDetector::new(config.detection.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match msg {
                    DetectorIn::Swap(event) => {
                        let sell = detector.on_swap(&event);
                        // The swap goes first so the analyzer never counts a
                        // trigger sell inside its own window
                        if tx.send(AnalyzerIn::Swap(event)).await.is_err() {
                            return;
                        }
                        if let Some(sell) = sell {
                            stats.sells_detected.fetch_add(1, Ordering::Relaxed);
                            if tx.send(AnalyzerIn::Sell(sell)).await.is_err() {
                                return;
                            }
                        }
                    }
                    DetectorIn::Tick { slot, time } => {
                        if tx.send(AnalyzerIn::Tick { slot, time }).await.is_err() {
                            return;
                        }
                    }
                    DetectorIn::Eof => {
                        let _ = tx.send(AnalyzerIn::Eof).await;
                        break;
                    }
                }
            }
        }
    }
    debug!("Detector stage stopped");
}

async fn analyzer_task(
    config: Config,
    rx: async_channel::Receiver<AnalyzerIn>,
    tx: async_channel::Sender<ValidatorIn>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut analyzer =
        AbsorptionAnalyzer::new(config.detection.clone(), config.absorption.clone());

    'outer: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let invalidated = analyzer.on_cancel();
                if !invalidated.is_empty() {
                    warn!(count = invalidated.len(), "Shutdown invalidated open windows");
                }
                break;
            }
            msg = rx.recv() => {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match msg {
                    AnalyzerIn::Sell(sell) => analyzer.on_sell(sell),
                    AnalyzerIn::Swap(event) => {
                        for finalized in analyzer.on_swap(&event) {
                            stats.windows_finalized.fetch_add(1, Ordering::Relaxed);
                            if tx.send(ValidatorIn::Finalized(finalized)).await.is_err() {
                                break 'outer;
                            }
                        }
                        if tx.send(ValidatorIn::Swap(event)).await.is_err() {
                            break 'outer;
                        }
                    }
                    AnalyzerIn::Tick { slot, time } => {
                        for finalized in analyzer.on_tick(slot) {
                            stats.windows_finalized.fetch_add(1, Ordering::Relaxed);
                            if tx.send(ValidatorIn::Finalized(finalized)).await.is_err() {
                                break 'outer;
                            }
                        }
                        if tx.send(ValidatorIn::Tick { slot, time }).await.is_err() {
                            break 'outer;
                        }
                    }
                    AnalyzerIn::Eof => {
                        for finalized in analyzer.on_eof() {
                            stats.windows_finalized.fetch_add(1, Ordering::Relaxed);
                            if tx.send(ValidatorIn::Finalized(finalized)).await.is_err() {
                                break 'outer;
                            }
                        }
                        let _ = tx.send(ValidatorIn::Eof).await;
                        break;
                    }
                }
            }
        }
    }
    stats
        .late_buys_dropped
        .fetch_add(analyzer.late_buys_dropped(), Ordering::Relaxed);
    stats
        .invalid_swaps
        .fetch_add(analyzer.overfull_candidates_dropped(), Ordering::Relaxed);
    debug!("Analyzer stage stopped");
}

async fn validator_task(
    config: Config,
    rx: async_channel::Receiver<ValidatorIn>,
    tx: async_channel::Sender<ScoringIn>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut validator = StabilizationValidator::new(config.stabilization.clone());

    let count = |stats: &PipelineStats, v: &ValidatedSell| {
        stats.sells_validated.fetch_add(1, Ordering::Relaxed);
        if v.result.stabilized {
            stats.sells_stabilized.fetch_add(1, Ordering::Relaxed);
        }
    };

    'outer: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match msg {
                    ValidatorIn::Finalized(finalized) => {
                        // The scoring stage hears about the close first so
                        // signals exist before the verdict arrives
                        if tx
                            .send(ScoringIn::WindowClosed(finalized.clone()))
                            .await
                            .is_err()
                        {
                            break 'outer;
                        }
                        validator.on_finalized(finalized);
                    }
                    ValidatorIn::Swap(event) => {
                        for validated in validator.on_swap(&event) {
                            count(&stats, &validated);
                            if tx.send(ScoringIn::Validated(validated)).await.is_err() {
                                break 'outer;
                            }
                        }
                        let price = ScoringIn::Price {
                            token_mint: event.token_mint.clone(),
                            price: event.price_base_per_token,
                            slot: event.slot(),
                            time: event.block_time,
                        };
                        if tx.send(price).await.is_err() {
                            break 'outer;
                        }
                    }
                    ValidatorIn::Tick { slot, time } => {
                        for validated in validator.on_tick(slot) {
                            count(&stats, &validated);
                            if tx.send(ScoringIn::Validated(validated)).await.is_err() {
                                break 'outer;
                            }
                        }
                        if tx.send(ScoringIn::Tick { time }).await.is_err() {
                            break 'outer;
                        }
                    }
                    ValidatorIn::Eof => {
                        for validated in validator.on_eof() {
                            count(&stats, &validated);
                            if tx.send(ScoringIn::Validated(validated)).await.is_err() {
                                break 'outer;
                            }
                        }
                        let _ = tx.send(ScoringIn::Eof).await;
                        break;
                    }
                }
            }
        }
    }
    debug!("Validator stage stopped");
}

async fn scoring_task(
    config: Config,
    rx: async_channel::Receiver<ScoringIn>,
    tx: async_channel::Sender<SignalUpdate>,
    scorer: Arc<WalletScorer>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut book = SignalBook::new(
        config.signals.clone(),
        config.detection.clone(),
        config.absorption.clone(),
    );
    let persist_path = config.scoring.persist_path.clone();

    let persist = |scorer: &WalletScorer| {
        if let Some(path) = &persist_path {
            scorer.persist(path);
        }
    };

    'outer: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                for signal in book.invalidate_all() {
                    stats.signals_invalidated.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.try_send(SignalUpdate::Resolved(signal));
                }
                persist(&scorer);
                let _ = tx.try_send(SignalUpdate::Eof);
                break;
            }
            msg = rx.recv() => {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match msg {
                    ScoringIn::WindowClosed(finalized) => {
                        // Deterministic timestamps: the trigger's block time
                        // and the window-end slot, both message-derived
                        let created = book.on_window_closed(
                            &finalized,
                            &scorer,
                            finalized.sell.block_time,
                            finalized.sell.window_end_slot,
                        );
                        if let Some(signal) = created {
                            stats.signals_emitted.fetch_add(1, Ordering::Relaxed);
                            if tx.send(SignalUpdate::Created(signal)).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    ScoringIn::Validated(validated) => {
                        // All updates for one sell event happen here, on one
                        // task, in candidate order
                        for candidate in &validated.candidates {
                            scorer.record(candidate, &validated.result, validated.sell.block_time);
                        }
                        scorer.maybe_decay(validated.sell.block_time);

                        if let Some(signal) = book.on_validated(&validated) {
                            match signal.status {
                                crate::events::SignalStatus::Confirmed => {
                                    stats.signals_confirmed.fetch_add(1, Ordering::Relaxed)
                                }
                                _ => stats.signals_expired.fetch_add(1, Ordering::Relaxed),
                            };
                            if tx.send(SignalUpdate::Resolved(signal)).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    ScoringIn::Price { token_mint, price, slot, time } => {
                        let update = SignalUpdate::Price { token_mint, price, slot, time };
                        if tx.send(update).await.is_err() {
                            break 'outer;
                        }
                    }
                    ScoringIn::Tick { time } => {
                        scorer.maybe_decay(time);
                    }
                    ScoringIn::Eof => {
                        persist(&scorer);
                        info!(
                            wallets = scorer.tracked_wallets(),
                            open_signals = book.open_signals(),
                            "Scoring stage complete"
                        );
                        let _ = tx.send(SignalUpdate::Eof).await;
                        break;
                    }
                }
            }
        }
    }
    debug!("Scoring stage stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKey, PoolStateSnapshot, Side};
    use crate::ingest::instruction::DexProgram;
    use chrono::TimeZone;

    fn recorded(slot: u64, tx_index: u32, side: Side, amount_base: f64, price: f64) -> SwapEvent {
        recorded_by(slot, tx_index, side, amount_base, price, "trader")
    }

    fn recorded_by(
        slot: u64,
        tx_index: u32,
        side: Side,
        amount_base: f64,
        price: f64,
        trader: &str,
    ) -> SwapEvent {
        let reserve_base = 100.0;
        SwapEvent {
            key: EventKey::new(slot, tx_index, 0, 0),
            signature: format!("sig-{}-{}", slot, tx_index),
            block_time: Utc.timestamp_opt(1_700_000_000 + slot as i64, 0).unwrap(),
            program: DexProgram::Raydium,
            pool_address: "pool".into(),
            token_mint: "mint".into(),
            base_mint: "base".into(),
            trader: trader.into(),
            side,
            amount_base,
            amount_token: amount_base / price,
            price_base_per_token: price,
            pool_state: PoolStateSnapshot {
                slot,
                pool_address: "pool".into(),
                reserve_base,
                reserve_token: reserve_base / price,
                price_base: price,
                liquidity_usd: None,
            },
        }
    }

    async fn drain(pipeline: Pipeline) -> (Vec<SignalUpdate>, StatsSnapshot) {
        let mut updates = Vec::new();
        while let Ok(update) = pipeline.signal_rx.recv().await {
            let eof = matches!(update, SignalUpdate::Eof);
            updates.push(update);
            if eof {
                break;
            }
        }
        let stats = pipeline.stats.snapshot();
        pipeline.join().await.unwrap();
        (updates, stats)
    }

    #[tokio::test]
    async fn test_pipeline_processes_recorded_events() {
        let config = Config::default();
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::spawn(&config, OrderingMode::Strict, cancel);

        let tx = pipeline.ingest_tx.clone();
        // A sell big enough to open a window, one absorbing buy, then EOF
        tx.send(IngestMsg::Recorded(Box::new(recorded(
            10,
            0,
            Side::Sell,
            2.0,
            0.0096,
        ))))
        .await
        .unwrap();
        tx.send(IngestMsg::Recorded(Box::new(recorded_by(
            11,
            0,
            Side::Buy,
            1.2,
            0.0097,
            "W_A",
        ))))
        .await
        .unwrap();
        tx.send(IngestMsg::Eof).await.unwrap();
        drop(tx);

        let pools = Arc::clone(&pipeline.pools);
        let scorer = Arc::clone(&pipeline.scorer);
        let (updates, stats) = drain(pipeline).await;

        assert_eq!(stats.swaps_normalized, 2);
        assert_eq!(stats.sells_detected, 1);
        assert_eq!(stats.windows_finalized, 1);
        assert_eq!(stats.sells_validated, 1);
        assert!(stats.fatal.is_none());

        // Price updates flow through; the run ends with Eof
        assert!(matches!(updates.last(), Some(SignalUpdate::Eof)));
        assert!(pools.latest("pool").is_some());
        // W_A absorbed 60% and was scored
        assert!(scorer.get("W_A").is_some());
    }

    #[tokio::test]
    async fn test_pipeline_rejects_out_of_order_in_strict_mode() {
        let config = Config::default();
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::spawn(&config, OrderingMode::Strict, cancel);

        let tx = pipeline.ingest_tx.clone();
        tx.send(IngestMsg::Recorded(Box::new(recorded(
            10,
            1,
            Side::Buy,
            1.0,
            0.01,
        ))))
        .await
        .unwrap();
        tx.send(IngestMsg::Recorded(Box::new(recorded(
            10,
            0,
            Side::Buy,
            1.0,
            0.01,
        ))))
        .await
        .unwrap();

        let err = pipeline.join().await.unwrap_err();
        assert!(matches!(err, Error::Determinism(_)));
    }

    #[tokio::test]
    async fn test_pipeline_drops_duplicates_without_stalling() {
        let config = Config::default();
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::spawn(&config, OrderingMode::Strict, cancel);

        let tx = pipeline.ingest_tx.clone();
        let event = recorded(10, 0, Side::Buy, 1.0, 0.01);
        tx.send(IngestMsg::Recorded(Box::new(event.clone())))
            .await
            .unwrap();
        let mut dup = event.clone();
        dup.key.tx_index = 1;
        tx.send(IngestMsg::Recorded(Box::new(dup))).await.unwrap();
        tx.send(IngestMsg::Eof).await.unwrap();

        let (_, stats) = drain(pipeline).await;
        assert_eq!(stats.swaps_normalized, 1);
        assert_eq!(stats.duplicate_signatures, 1);
        assert!(stats.fatal.is_none());
    }
}
