//! Chain ingestion: sync engine plus the per-chain unit sources.

pub mod bitcoin;
pub mod engine;
pub mod evm;

pub use bitcoin::BtcSource;
pub use engine::{plan_batch, ChainSource, SyncEngine, SyncOutcome};
pub use evm::EvmSource;
