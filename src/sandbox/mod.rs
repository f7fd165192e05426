//! Deterministic replay sandbox
//!
//! Everything virtual: seeded fills, a paper portfolio, the replay driver,
//! and the report artifacts. Given (dataset, configuration, seed), every
//! output byte is reproducible.

pub mod dataset;
pub mod fill;
pub mod portfolio;
pub mod replay;
pub mod report;
pub mod rng;

pub use dataset::{load_dataset, Dataset, RecordedSwap};
pub use fill::{Fill, FillFailure, FillSimulator, PoolHistory};
pub use portfolio::{ExitReason, VirtualPortfolio, VirtualPosition, VirtualTrade};
pub use replay::{run as run_replay, ReplayOutcome};
pub use report::{ReportWriter, RunReport};
pub use rng::Lcg32;
