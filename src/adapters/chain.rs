use async_trait::async_trait;

use crate::domain::Chain;
use crate::error::AdapterError;

/// Uniform read capability over a chain backend.
///
/// Implementations perform exactly one logical backend interaction per call
/// and never retry; retry policy belongs to the sync engine.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Block payload returned by [`ChainAdapter::fetch_block`]
    type Block: Send + Sync;
    /// Transaction payload returned by [`ChainAdapter::fetch_transaction`]
    type Transaction: Send + Sync;

    fn chain(&self) -> Chain;

    /// Current tip height / block number
    async fn latest_height(&self) -> Result<u64, AdapterError>;

    /// Full block at `height`. A block the backend does not know is an error.
    async fn fetch_block(&self, height: u64) -> Result<Self::Block, AdapterError>;

    /// Transaction detail by id (for EVM: the receipt)
    async fn fetch_transaction(&self, id: &str) -> Result<Self::Transaction, AdapterError>;
}
