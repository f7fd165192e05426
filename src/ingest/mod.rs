//! Ingestion fabric
//!
//! Raw transactions in, canonical ordered swap events out: program
//! recognition, balance-delta normalization, signature dedup, and event
//! ordering.

pub mod instruction;
pub mod normalizer;
pub mod ordering;

pub use instruction::DexProgram;
pub use normalizer::SwapNormalizer;
pub use ordering::{OrderingMode, ReorderBuffer, SignatureCache};
