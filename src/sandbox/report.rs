//! Run artifacts
//!
//! One directory per run: `summary.json`, `trades.csv`,
//! `wallet_performance.csv`, `report.md`, and `checksums.json` with
//! SHA-256 digests of the first two so determinism can be checked by
//! diffing one small file. Prices carry eight fractional digits; slots are
//! integers. Nothing here reads the wall clock.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pipeline::StatsSnapshot;
use crate::sandbox::portfolio::{DrawdownPoint, EquityPoint, VirtualTrade};
use crate::scorer::WalletBehavior;

/// Fill-failure tally from the trading loop
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FillFailureCounts {
    pub quote_stale: u64,
    pub route_fail: u64,
    pub slippage_exceeded: u64,
}

impl FillFailureCounts {
    pub fn total(&self) -> u64 {
        self.quote_stale + self.route_fail + self.slippage_exceeded
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketCoverage {
    pub tokens_traded: Vec<String>,
    pub pools_seen: usize,
    pub events_processed: u64,
    pub sells_detected: u64,
    pub windows_finalized: u64,
}

/// Aggregates for `summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub dataset_path: String,
    pub seed: u32,
    pub execution_mode: String,
    pub speed: String,
    pub first_slot: Option<u64>,
    pub last_slot: Option<u64>,
    pub events_loaded: usize,

    pub starting_capital: f64,
    pub final_capital: f64,
    pub net_pnl: f64,
    pub total_fees: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub avg_holding_slots: f64,
    pub expectancy: f64,
    pub sharpe: f64,
    pub max_drawdown_base: f64,
    pub max_drawdown_pct: f64,

    pub fill_failures: FillFailureCounts,
    pub market_coverage: MarketCoverage,
    pub pipeline: StatsSnapshot,

    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
}

/// Everything a finished run produces
pub struct RunReport {
    pub summary: Summary,
    pub trades: Vec<VirtualTrade>,
    pub wallets: Vec<WalletBehavior>,
}

/// Trade-statistics helper shared by summary and report.md
pub fn trade_stats(trades: &[VirtualTrade]) -> (usize, usize, f64, f64, f64, f64) {
    let total = trades.len();
    let winners = trades.iter().filter(|t| t.realized_pnl > 0.0).count();
    let win_rate = if total > 0 {
        winners as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let avg_holding = if total > 0 {
        trades.iter().map(|t| t.holding_slots as f64).sum::<f64>() / total as f64
    } else {
        0.0
    };
    let expectancy = if total > 0 {
        trades.iter().map(|t| t.realized_pnl).sum::<f64>() / total as f64
    } else {
        0.0
    };

    // Sharpe over per-trade returns, population deviation
    let sharpe = if total >= 2 {
        let returns: Vec<f64> = trades
            .iter()
            .map(|t| {
                if t.cost_base > 0.0 {
                    t.realized_pnl / t.cost_base
                } else {
                    0.0
                }
            })
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std = variance.sqrt();
        if std > 0.0 {
            mean / std
        } else {
            0.0
        }
    } else {
        0.0
    };

    (total, winners, win_rate, avg_holding, expectancy, sharpe)
}

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every artifact; returns the run directory
    pub fn write(&self, report: &RunReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::Report(e.to_string()))?;

        let summary_json = serde_json::to_string_pretty(&report.summary)?;
        self.write_file("summary.json", summary_json.as_bytes())?;

        let trades_csv = Self::render_trades_csv(&report.trades)?;
        self.write_file("trades.csv", trades_csv.as_bytes())?;

        let wallets_csv = Self::render_wallets_csv(&report.wallets)?;
        self.write_file("wallet_performance.csv", wallets_csv.as_bytes())?;

        let markdown = Self::render_markdown(report);
        self.write_file("report.md", markdown.as_bytes())?;

        let checksums = serde_json::json!({
            "summary.json": hex_sha256(summary_json.as_bytes()),
            "trades.csv": hex_sha256(trades_csv.as_bytes()),
        });
        self.write_file(
            "checksums.json",
            serde_json::to_string_pretty(&checksums)?.as_bytes(),
        )?;

        Ok(self.dir.clone())
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        std::fs::write(self.dir.join(name), bytes).map_err(|e| Error::Report(e.to_string()))
    }

    fn render_trades_csv(trades: &[VirtualTrade]) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "id",
            "token_mint",
            "pool_address",
            "absorber_wallet",
            "signal_strength",
            "stabilization_confidence",
            "entry_slot",
            "entry_time",
            "entry_price",
            "entry_slippage_bps",
            "exit_slot",
            "exit_time",
            "exit_price",
            "exit_slippage_bps",
            "token_amount",
            "cost_base",
            "proceeds_base",
            "fees_base",
            "realized_pnl",
            "holding_slots",
            "mae_base",
            "mfe_base",
            "exit_reason",
        ])?;

        for t in trades {
            writer.write_record([
                t.id.clone(),
                t.token_mint.clone(),
                t.pool_address.clone(),
                t.absorber_wallet.clone(),
                format!("{:.4}", t.signal_strength),
                t.stabilization_confidence
                    .map(|c| format!("{:.4}", c))
                    .unwrap_or_default(),
                t.entry_slot.to_string(),
                t.entry_time.to_rfc3339(),
                format!("{:.8}", t.entry_price),
                format!("{:.4}", t.entry_slippage_bps),
                t.exit_slot.to_string(),
                t.exit_time.to_rfc3339(),
                format!("{:.8}", t.exit_price),
                format!("{:.4}", t.exit_slippage_bps),
                format!("{:.8}", t.token_amount),
                format!("{:.8}", t.cost_base),
                format!("{:.8}", t.proceeds_base),
                format!("{:.8}", t.fees_base),
                format!("{:.8}", t.realized_pnl),
                t.holding_slots.to_string(),
                format!("{:.8}", t.mae_base),
                format!("{:.8}", t.mfe_base),
                t.exit_reason.to_string(),
            ])?;
        }

        String::from_utf8(
            writer
                .into_inner()
                .map_err(|e| Error::Report(e.to_string()))?,
        )
        .map_err(|e| Error::Report(e.to_string()))
    }

    fn render_wallets_csv(wallets: &[WalletBehavior]) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "wallet",
            "classification",
            "status",
            "confidence",
            "total_absorptions",
            "successful_absorptions",
            "failed_absorptions",
            "stabilization_success_rate",
            "unique_tokens",
            "avg_absorption_fraction",
            "avg_response_latency_slots",
            "size_consistency",
            "activity_pattern",
            "first_seen",
            "last_seen",
        ])?;

        for w in wallets {
            writer.write_record([
                w.wallet.clone(),
                w.classification.to_string(),
                format!("{:?}", w.status).to_lowercase(),
                format!("{:.4}", w.confidence),
                w.total_absorptions.to_string(),
                w.successful_absorptions.to_string(),
                w.failed_absorptions.to_string(),
                format!("{:.4}", w.stabilization_success_rate),
                w.unique_tokens.len().to_string(),
                format!("{:.8}", w.avg_absorption_fraction),
                format!("{:.4}", w.avg_response_latency),
                format!("{:.4}", w.size_consistency),
                format!("{:?}", w.activity_pattern).to_lowercase(),
                w.first_seen.to_rfc3339(),
                w.last_seen.to_rfc3339(),
            ])?;
        }

        String::from_utf8(
            writer
                .into_inner()
                .map_err(|e| Error::Report(e.to_string()))?,
        )
        .map_err(|e| Error::Report(e.to_string()))
    }

    fn render_markdown(report: &RunReport) -> String {
        let s = &report.summary;
        let mut md = String::new();

        md.push_str("# Replay Report\n\n");
        md.push_str(&format!(
            "Dataset `{}`, seed {}, execution mode `{}`, speed `{}`.\n\n",
            s.dataset_path, s.seed, s.execution_mode, s.speed
        ));
        md.push_str(&format!(
            "{} events over slots {}..{}.\n\n",
            s.events_loaded,
            s.first_slot.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            s.last_slot.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        ));

        md.push_str("## Performance\n\n");
        md.push_str(&format!(
            "| Metric | Value |\n|---|---|\n\
             | Trades | {} |\n\
             | Win rate | {:.2}% |\n\
             | Net P&L | {:.8} |\n\
             | Total fees | {:.8} |\n\
             | Expectancy | {:.8} |\n\
             | Sharpe | {:.4} |\n\
             | Max drawdown | {:.8} ({:.2}%) |\n\
             | Avg holding | {:.1} slots |\n\
             | Final capital | {:.8} |\n\n",
            s.total_trades,
            s.win_rate_pct,
            s.net_pnl,
            s.total_fees,
            s.expectancy,
            s.sharpe,
            s.max_drawdown_base,
            s.max_drawdown_pct,
            s.avg_holding_slots,
            s.final_capital,
        ));

        md.push_str("## Signals\n\n");
        md.push_str(&format!(
            "{} emitted, {} confirmed, {} expired, {} invalidated. \
             Fill failures: {} quote-stale, {} route, {} slippage.\n\n",
            s.pipeline.signals_emitted,
            s.pipeline.signals_confirmed,
            s.pipeline.signals_expired,
            s.pipeline.signals_invalidated,
            s.fill_failures.quote_stale,
            s.fill_failures.route_fail,
            s.fill_failures.slippage_exceeded,
        ));

        md.push_str("## Wallets\n\n");
        md.push_str("| Wallet | Class | Confidence | Events | Success rate |\n|---|---|---|---|---|\n");
        for w in report.wallets.iter().take(10) {
            md.push_str(&format!(
                "| {} | {} | {:.1} | {} | {:.2} |\n",
                w.wallet,
                w.classification,
                w.confidence,
                w.total_absorptions,
                w.stabilization_success_rate,
            ));
        }
        md.push('\n');

        md.push_str("## Errors\n\n");
        md.push_str(&format!(
            "Dropped events: {} invalid, {} duplicate, {} unknown program, \
             {} bad pool state, {} out of order. Late buys dropped: {}.\n",
            s.pipeline.invalid_swaps,
            s.pipeline.duplicate_signatures,
            s.pipeline.unknown_programs,
            s.pipeline.invalid_pool_state,
            s.pipeline.out_of_order_dropped,
            s.pipeline.late_buys_dropped,
        ));
        if let Some(fatal) = &s.pipeline.fatal {
            md.push_str(&format!("\n**Fatal determinism violation:** {}\n", fatal));
        }

        md
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
