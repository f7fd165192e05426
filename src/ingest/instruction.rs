//! Recognized DEX programs and swap-instruction account layouts
//!
//! # WARNING: These constants may change without notice
//! DEX programs redeploy; if parsing starts rejecting live traffic,
//! the program ids and account layouts below may need updating.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chain::RawInstruction;
use crate::error::{Error, Result};

/// Raydium AMM v4 program id
pub const RAYDIUM_AMM_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// PumpSwap AMM program id
pub const PUMP_SWAP_PROGRAM_ID: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";

lazy_static::lazy_static! {
    /// Program-id registry for swap recognition
    static ref PROGRAM_REGISTRY: HashMap<&'static str, DexProgram> = {
        let mut m = HashMap::new();
        m.insert(RAYDIUM_AMM_PROGRAM_ID, DexProgram::Raydium);
        m.insert(PUMP_SWAP_PROGRAM_ID, DexProgram::PumpSwap);
        m
    };
}

/// Tagged DEX program; downstream code dispatches on this, never on raw ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DexProgram {
    Raydium,
    PumpSwap,
    Unknown,
}

impl DexProgram {
    /// Classify a program id
    pub fn from_program_id(program_id: &str) -> Self {
        PROGRAM_REGISTRY
            .get(program_id)
            .copied()
            .unwrap_or(DexProgram::Unknown)
    }

    pub fn is_recognized(&self) -> bool {
        *self != DexProgram::Unknown
    }
}

impl std::fmt::Display for DexProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DexProgram::Raydium => write!(f, "raydium"),
            DexProgram::PumpSwap => write!(f, "pumpswap"),
            DexProgram::Unknown => write!(f, "unknown"),
        }
    }
}

/// Accounts of interest named by a swap instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapAccounts {
    pub pool_address: String,
    pub token_mint: String,
    pub base_mint: String,
}

// Account-layout offsets per program. The layouts are position-based:
// each program places the pool account and the two mints at fixed indices
// in the swap instruction's account list.
const RAYDIUM_POOL_IDX: usize = 1;
const RAYDIUM_BASE_MINT_IDX: usize = 4;
const RAYDIUM_TOKEN_MINT_IDX: usize = 5;

const PUMP_POOL_IDX: usize = 0;
const PUMP_BASE_MINT_IDX: usize = 3;
const PUMP_TOKEN_MINT_IDX: usize = 4;

/// Extract the pool and mint accounts from a recognized swap instruction.
///
/// This is the decoder contract for each DEX program: given the program tag
/// and the instruction's ordered account list, name the pool and the two
/// legs. Unknown programs are rejected before reaching here.
pub fn decode_swap_accounts(program: DexProgram, ix: &RawInstruction) -> Result<SwapAccounts> {
    let pick = |idx: usize| -> Result<String> {
        ix.accounts.get(idx).cloned().ok_or_else(|| {
            Error::InvalidSwap(format!(
                "{} swap instruction has {} accounts, needs index {}",
                program,
                ix.accounts.len(),
                idx
            ))
        })
    };

    match program {
        DexProgram::Raydium => Ok(SwapAccounts {
            pool_address: pick(RAYDIUM_POOL_IDX)?,
            base_mint: pick(RAYDIUM_BASE_MINT_IDX)?,
            token_mint: pick(RAYDIUM_TOKEN_MINT_IDX)?,
        }),
        DexProgram::PumpSwap => Ok(SwapAccounts {
            pool_address: pick(PUMP_POOL_IDX)?,
            base_mint: pick(PUMP_BASE_MINT_IDX)?,
            token_mint: pick(PUMP_TOKEN_MINT_IDX)?,
        }),
        DexProgram::Unknown => Err(Error::UnknownProgram(ix.program_id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raydium_ix(accounts: Vec<&str>) -> RawInstruction {
        RawInstruction {
            program_id: RAYDIUM_AMM_PROGRAM_ID.to_string(),
            accounts: accounts.into_iter().map(String::from).collect(),
            data: String::new(),
            inner_index: 0,
        }
    }

    #[test]
    fn test_registry_classification() {
        assert_eq!(
            DexProgram::from_program_id(RAYDIUM_AMM_PROGRAM_ID),
            DexProgram::Raydium
        );
        assert_eq!(
            DexProgram::from_program_id(PUMP_SWAP_PROGRAM_ID),
            DexProgram::PumpSwap
        );
        assert_eq!(
            DexProgram::from_program_id("11111111111111111111111111111111"),
            DexProgram::Unknown
        );
    }

    #[test]
    fn test_raydium_account_layout() {
        let ix = raydium_ix(vec!["auth", "pool", "coin", "pc", "base", "mint", "user"]);
        let accounts = decode_swap_accounts(DexProgram::Raydium, &ix).unwrap();
        assert_eq!(accounts.pool_address, "pool");
        assert_eq!(accounts.base_mint, "base");
        assert_eq!(accounts.token_mint, "mint");
    }

    #[test]
    fn test_truncated_account_list_rejected() {
        let ix = raydium_ix(vec!["auth", "pool"]);
        let err = decode_swap_accounts(DexProgram::Raydium, &ix).unwrap_err();
        assert!(matches!(err, Error::InvalidSwap(_)));
    }

    #[test]
    fn test_unknown_program_rejected() {
        let ix = RawInstruction {
            program_id: "unknown".into(),
            accounts: vec![],
            data: String::new(),
            inner_index: 0,
        };
        assert!(matches!(
            decode_swap_accounts(DexProgram::Unknown, &ix),
            Err(Error::UnknownProgram(_))
        ));
    }
}
