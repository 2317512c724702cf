use async_trait::async_trait;
use tracing::debug;

use super::engine::ChainSource;
use crate::adapters::chain::ChainAdapter;
use crate::adapters::evm_rpc::{EvmBlock, EvmReceipt};
use crate::classifier::evm::classify_block;
use crate::classifier::EvmAssetParams;
use crate::domain::{AddressCatalogue, Chain, Transfer};
use crate::error::Result;

/// EVM unit = one block plus the receipt of every transaction in it
pub struct EvmSource<A> {
    adapter: A,
    params: EvmAssetParams,
    batch_size: u64,
}

impl<A> EvmSource<A>
where
    A: ChainAdapter<Block = EvmBlock, Transaction = EvmReceipt>,
{
    pub fn new(adapter: A, params: EvmAssetParams, batch_size: u64) -> Self {
        Self {
            adapter,
            params,
            batch_size,
        }
    }
}

#[async_trait]
impl<A> ChainSource for EvmSource<A>
where
    A: ChainAdapter<Block = EvmBlock, Transaction = EvmReceipt>,
{
    fn chain(&self) -> Chain {
        Chain::Evm
    }

    fn batch_size(&self) -> u64 {
        self.batch_size
    }

    async fn latest_height(&self) -> Result<u64> {
        Ok(self.adapter.latest_height().await?)
    }

    async fn transfers_in_unit(&self, height: u64, catalogue: &AddressCatalogue) -> Result<Vec<Transfer>> {
        let block = self.adapter.fetch_block(height).await?;

        let mut receipts = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let Some(hash) = tx.hash.as_deref() else {
                debug!("block {}: transaction without hash", height);
                continue;
            };
            receipts.push(self.adapter.fetch_transaction(hash).await?);
        }

        Ok(classify_block(&block, &receipts, height, catalogue, &self.params))
    }
}
