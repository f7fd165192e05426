//! Recorded dataset loading
//!
//! JSON-lines, one swap per line, camelCase fields. Files are append-only
//! and recorded in arrival order, so the loader re-sorts into canonical
//! `(slot, txIndex, innerIndex, logIndex)` order. The replay driver
//! requires totality: malformed lines, duplicate ordering keys, and
//! missing `txIndex` on colliding slots are all fatal.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::events::{EventKey, PoolStateSnapshot, Side, Slot, SwapEvent};
use crate::ingest::instruction::DexProgram;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPoolState {
    pub slot: Slot,
    pub pool_address: String,
    pub reserve_base: f64,
    pub reserve_token: f64,
    pub price_base: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity_usd: Option<f64>,
}

/// One line of a recorded dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSwap {
    pub slot: Slot,
    pub signature: String,
    /// Unix seconds
    pub block_time: i64,
    pub program_id: String,
    /// Optional in the wild; required whenever a slot holds several events
    #[serde(default)]
    pub tx_index: Option<u32>,
    #[serde(default)]
    pub log_index: u32,
    #[serde(default)]
    pub inner_index: u32,
    pub pool_address: String,
    pub token_mint: String,
    pub base_mint: String,
    pub trader: String,
    pub side: Side,
    pub amount_in: f64,
    pub amount_out: f64,
    pub amount_in_base: f64,
    pub amount_out_base: f64,
    pub pool_state: RecordedPoolState,
}

impl RecordedSwap {
    /// Convert into the canonical event type
    pub fn into_event(self) -> Result<SwapEvent> {
        // For a buy the base leg goes in; for a sell it comes out
        let (amount_base, amount_token) = match self.side {
            Side::Buy => (self.amount_in_base, self.amount_out),
            Side::Sell => (self.amount_out_base, self.amount_in),
        };
        if amount_base <= 0.0 || amount_token <= 0.0 {
            return Err(Error::Dataset(format!(
                "{}: non-positive amounts",
                self.signature
            )));
        }

        let block_time = Utc
            .timestamp_opt(self.block_time, 0)
            .single()
            .ok_or_else(|| {
                Error::Dataset(format!("{}: bad blockTime {}", self.signature, self.block_time))
            })?;

        Ok(SwapEvent {
            key: EventKey::new(
                self.slot,
                self.tx_index.unwrap_or(0),
                self.inner_index,
                self.log_index,
            ),
            signature: self.signature,
            block_time,
            program: DexProgram::from_program_id(&self.program_id),
            pool_address: self.pool_address,
            token_mint: self.token_mint,
            base_mint: self.base_mint,
            trader: self.trader,
            side: self.side,
            amount_base,
            amount_token,
            price_base_per_token: amount_base / amount_token,
            pool_state: PoolStateSnapshot {
                slot: self.pool_state.slot,
                pool_address: self.pool_state.pool_address,
                reserve_base: self.pool_state.reserve_base,
                reserve_token: self.pool_state.reserve_token,
                price_base: self.pool_state.price_base,
                liquidity_usd: self.pool_state.liquidity_usd,
            },
        })
    }
}

/// A loaded, validated, canonically ordered dataset
#[derive(Debug)]
pub struct Dataset {
    pub events: Vec<SwapEvent>,
    pub first_slot: Option<Slot>,
    pub last_slot: Option<Slot>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Load a dataset file, honoring optional slot bounds
pub fn load_dataset(
    path: &Path,
    start_slot: Option<Slot>,
    end_slot: Option<Slot>,
) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Dataset(format!("open {}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);

    let mut rows: Vec<RecordedSwap> = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::Dataset(format!("line {}: {}", line_no + 1, e)))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row: RecordedSwap = serde_json::from_str(trimmed)
            .map_err(|e| Error::Dataset(format!("line {}: {}", line_no + 1, e)))?;
        rows.push(row);
    }

    from_rows(rows, start_slot, end_slot)
}

/// Validate and order rows; shared by the file loader and tests
pub fn from_rows(
    rows: Vec<RecordedSwap>,
    start_slot: Option<Slot>,
    end_slot: Option<Slot>,
) -> Result<Dataset> {
    let rows: Vec<RecordedSwap> = rows
        .into_iter()
        .filter(|r| start_slot.map(|s| r.slot >= s).unwrap_or(true))
        .filter(|r| end_slot.map(|s| r.slot <= s).unwrap_or(true))
        .collect();

    // txIndex must be populated wherever several events share a slot,
    // otherwise total ordering is fiction
    let mut per_slot: HashMap<Slot, u32> = HashMap::new();
    for row in &rows {
        *per_slot.entry(row.slot).or_insert(0) += 1;
    }
    for row in &rows {
        if row.tx_index.is_none() && per_slot[&row.slot] > 1 {
            return Err(Error::Dataset(format!(
                "slot {} holds {} events but {} has no txIndex",
                row.slot, per_slot[&row.slot], row.signature
            )));
        }
    }

    let mut events: Vec<SwapEvent> = rows
        .into_iter()
        .map(|r| r.into_event())
        .collect::<Result<_>>()?;
    events.sort_by_key(|e| e.key);

    let mut seen_keys: HashSet<EventKey> = HashSet::with_capacity(events.len());
    for event in &events {
        if !seen_keys.insert(event.key) {
            return Err(Error::Determinism(format!(
                "duplicate ordering key {} in dataset",
                event.key
            )));
        }
    }

    let first_slot = events.first().map(|e| e.key.slot);
    let last_slot = events.last().map(|e| e.key.slot);
    Ok(Dataset {
        events,
        first_slot,
        last_slot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn row(
        slot: Slot,
        tx_index: Option<u32>,
        signature: &str,
        side: Side,
        amount_base: f64,
        reserve_base: f64,
        reserve_token: f64,
    ) -> RecordedSwap {
        let price = reserve_base / reserve_token;
        let amount_token = amount_base / price;
        let (amount_in, amount_out, amount_in_base, amount_out_base) = match side {
            Side::Buy => (amount_base, amount_token, amount_base, 0.0),
            Side::Sell => (amount_token, amount_base, 0.0, amount_base),
        };
        RecordedSwap {
            slot,
            signature: signature.to_string(),
            block_time: 1_700_000_000 + slot as i64,
            program_id: crate::ingest::instruction::RAYDIUM_AMM_PROGRAM_ID.to_string(),
            tx_index,
            log_index: 0,
            inner_index: 0,
            pool_address: "pool".into(),
            token_mint: "mint".into(),
            base_mint: "base".into(),
            trader: "trader".into(),
            side,
            amount_in,
            amount_out,
            amount_in_base,
            amount_out_base,
            pool_state: RecordedPoolState {
                slot,
                pool_address: "pool".into(),
                reserve_base,
                reserve_token,
                price_base: price,
                liquidity_usd: None,
            },
        }
    }

    #[test]
    fn test_rows_sorted_into_canonical_order() {
        let rows = vec![
            row(12, Some(0), "c", Side::Buy, 1.0, 100.0, 10_000.0),
            row(10, Some(1), "b", Side::Buy, 1.0, 100.0, 10_000.0),
            row(10, Some(0), "a", Side::Buy, 1.0, 100.0, 10_000.0),
        ];
        let dataset = from_rows(rows, None, None).unwrap();
        let signatures: Vec<&str> = dataset.events.iter().map(|e| e.signature.as_str()).collect();
        assert_eq!(signatures, vec!["a", "b", "c"]);
        assert_eq!(dataset.first_slot, Some(10));
        assert_eq!(dataset.last_slot, Some(12));
    }

    #[test]
    fn test_missing_tx_index_rejected_on_collision() {
        let rows = vec![
            row(10, None, "a", Side::Buy, 1.0, 100.0, 10_000.0),
            row(10, Some(1), "b", Side::Buy, 1.0, 100.0, 10_000.0),
        ];
        let err = from_rows(rows, None, None).unwrap_err();
        assert!(matches!(err, Error::Dataset(_)));

        // A lone event per slot may omit it
        let rows = vec![
            row(10, None, "a", Side::Buy, 1.0, 100.0, 10_000.0),
            row(11, None, "b", Side::Buy, 1.0, 100.0, 10_000.0),
        ];
        assert!(from_rows(rows, None, None).is_ok());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let rows = vec![
            row(10, Some(0), "a", Side::Buy, 1.0, 100.0, 10_000.0),
            row(10, Some(0), "b", Side::Buy, 1.0, 100.0, 10_000.0),
        ];
        let err = from_rows(rows, None, None).unwrap_err();
        assert!(matches!(err, Error::Determinism(_)));
    }

    #[test]
    fn test_slot_bounds() {
        let rows = vec![
            row(10, Some(0), "a", Side::Buy, 1.0, 100.0, 10_000.0),
            row(20, Some(0), "b", Side::Buy, 1.0, 100.0, 10_000.0),
            row(30, Some(0), "c", Side::Buy, 1.0, 100.0, 10_000.0),
        ];
        let dataset = from_rows(rows, Some(15), Some(25)).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.events[0].signature, "b");
    }

    #[test]
    fn test_side_amount_mapping() {
        let rows = vec![
            row(10, Some(0), "buy", Side::Buy, 2.0, 100.0, 10_000.0),
            row(11, Some(0), "sell", Side::Sell, 2.0, 100.0, 10_000.0),
        ];
        let dataset = from_rows(rows, None, None).unwrap();
        for event in &dataset.events {
            assert!((event.amount_base - 2.0).abs() < 1e-12);
            assert!((event.price_base_per_token - 0.01).abs() < 1e-12);
        }
    }

    #[test]
    fn test_json_round_trip() {
        let original = row(10, Some(3), "sig", Side::Sell, 2.0, 100.0, 10_000.0);
        let json = serde_json::to_string(&original).unwrap();
        assert!(json.contains(r#""txIndex":3"#));
        assert!(json.contains(r#""poolAddress":"pool""#));
        assert!(json.contains(r#""side":"sell""#));

        let parsed: RecordedSwap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.slot, 10);
        assert_eq!(parsed.tx_index, Some(3));
    }

    #[test]
    fn test_load_dataset_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let lines: Vec<String> = vec![
            serde_json::to_string(&row(11, Some(0), "b", Side::Buy, 1.0, 100.0, 10_000.0))
                .unwrap(),
            serde_json::to_string(&row(10, Some(0), "a", Side::Buy, 1.0, 100.0, 10_000.0))
                .unwrap(),
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let dataset = load_dataset(&path, None, None).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.events[0].signature, "a");

        // Malformed lines are fatal in replay
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_dataset(&path, None, None),
            Err(Error::Dataset(_))
        ));
    }
}
