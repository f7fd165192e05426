//! Swap normalization
//!
//! Turns raw parsed transactions into canonical [`SwapEvent`]s. The trader
//! is the unique account owner whose balances change in both the base and
//! the target token; the pool's reserves come from its vault accounts'
//! post-transaction balances, never from the swap amounts. Failures here
//! are per-event drops, counted and logged, never retried.

use std::collections::BTreeMap;
use tracing::debug;

use crate::chain::RawTransaction;
use crate::error::{Error, Result};
use crate::events::{EventKey, PoolStateSnapshot, Side, SwapEvent};
use crate::ingest::instruction::{decode_swap_accounts, DexProgram, SwapAccounts};
use crate::ingest::ordering::SignatureCache;

pub struct SwapNormalizer {
    signatures: SignatureCache,
}

impl SwapNormalizer {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            signatures: SignatureCache::new(dedup_capacity),
        }
    }

    /// Normalize a raw transaction into at most one swap event.
    ///
    /// A signature yields one `SwapEvent` ever; duplicates are rejected.
    pub fn normalize(&mut self, raw: &RawTransaction) -> Result<SwapEvent> {
        if raw.signature.is_empty() {
            return Err(Error::InvalidSwap("empty signature".into()));
        }

        let (program, ix) = raw
            .instructions
            .iter()
            .find_map(|ix| {
                let program = DexProgram::from_program_id(&ix.program_id);
                program.is_recognized().then_some((program, ix))
            })
            .ok_or_else(|| Error::UnknownProgram(raw.signature.clone()))?;

        let accounts = decode_swap_accounts(program, ix)?;
        let (trader, side, amount_base, amount_token) = self.identify_trader(raw, &accounts)?;
        let pool_state = self.extract_reserves(raw, &accounts)?;

        if amount_token <= 0.0 || amount_base <= 0.0 {
            return Err(Error::InvalidSwap(format!(
                "{}: non-positive swap amounts base={} token={}",
                raw.signature, amount_base, amount_token
            )));
        }

        // Dedup only after successful extraction so an invalid transaction
        // never poisons its signature
        if !self.signatures.insert(&raw.signature) {
            return Err(Error::DuplicateSignature(raw.signature.clone()));
        }

        let event = SwapEvent {
            key: EventKey::new(raw.slot, raw.tx_index, ix.inner_index, 0),
            signature: raw.signature.clone(),
            block_time: raw.block_time,
            program,
            pool_address: accounts.pool_address,
            token_mint: accounts.token_mint,
            base_mint: accounts.base_mint,
            trader,
            side,
            amount_base,
            amount_token,
            price_base_per_token: amount_base / amount_token,
            pool_state,
        };

        debug!(
            signature = %event.signature,
            side = %event.side,
            amount_base = event.amount_base,
            "Normalized swap"
        );
        Ok(event)
    }

    /// Admit an already-canonical event from the recorded dataset.
    ///
    /// The replay path re-runs deduplication and the pool invariants so a
    /// corrupted recording is caught at the same choke point as live data.
    pub fn admit_recorded(&mut self, event: SwapEvent) -> Result<SwapEvent> {
        event.pool_state.validate()?;
        if event.amount_base <= 0.0 || event.amount_token <= 0.0 {
            return Err(Error::InvalidSwap(format!(
                "{}: non-positive swap amounts",
                event.signature
            )));
        }
        if !self.signatures.insert(&event.signature) {
            return Err(Error::DuplicateSignature(event.signature));
        }
        Ok(event)
    }

    /// The trader is the unique non-pool owner whose balances change in
    /// both the base and the target token.
    fn identify_trader(
        &self,
        raw: &RawTransaction,
        accounts: &SwapAccounts,
    ) -> Result<(String, Side, f64, f64)> {
        // owner -> (base delta, token delta); BTreeMap keeps any ambiguity
        // report deterministic
        let mut deltas: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

        for balance in &raw.token_balances {
            if balance.owner == accounts.pool_address {
                continue;
            }
            let entry = deltas.entry(balance.owner.as_str()).or_insert((0.0, 0.0));
            if balance.mint == accounts.base_mint {
                entry.0 += balance.delta();
            } else if balance.mint == accounts.token_mint {
                entry.1 += balance.delta();
            }
        }

        let mut traders = deltas
            .iter()
            .filter(|(_, (base, token))| *base != 0.0 && *token != 0.0);

        let (owner, (base_delta, token_delta)) = traders
            .next()
            .ok_or_else(|| {
                Error::InvalidSwap(format!(
                    "{}: no account changed in both {} and {}",
                    raw.signature, accounts.base_mint, accounts.token_mint
                ))
            })?;

        if traders.next().is_some() {
            return Err(Error::InvalidSwap(format!(
                "{}: multiple candidate traders",
                raw.signature
            )));
        }

        // A buy spends base and receives token; a sell is the reverse.
        // Same-sign deltas are impossible balance movements.
        let side = match (base_delta > &0.0, token_delta > &0.0) {
            (false, true) => Side::Buy,
            (true, false) => Side::Sell,
            _ => {
                return Err(Error::InvalidSwap(format!(
                    "{}: same-sign balance deltas base={} token={}",
                    raw.signature, base_delta, token_delta
                )))
            }
        };

        Ok((
            owner.to_string(),
            side,
            base_delta.abs(),
            token_delta.abs(),
        ))
    }

    /// Reserves from the pool's vault accounts' post balances
    fn extract_reserves(
        &self,
        raw: &RawTransaction,
        accounts: &SwapAccounts,
    ) -> Result<PoolStateSnapshot> {
        let vault_post = |mint: &str| -> Option<f64> {
            raw.token_balances
                .iter()
                .find(|b| b.owner == accounts.pool_address && b.mint == mint)
                .map(|b| b.post_amount)
        };

        let reserve_base = vault_post(&accounts.base_mint).ok_or_else(|| {
            Error::InvalidSwap(format!("{}: missing base vault balance", raw.signature))
        })?;
        let reserve_token = vault_post(&accounts.token_mint).ok_or_else(|| {
            Error::InvalidSwap(format!("{}: missing token vault balance", raw.signature))
        })?;

        let snapshot = PoolStateSnapshot {
            slot: raw.slot,
            pool_address: accounts.pool_address.clone(),
            reserve_base,
            reserve_token,
            price_base: if reserve_token > 0.0 {
                reserve_base / reserve_token
            } else {
                f64::NAN
            },
            liquidity_usd: None,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}
