use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::engine::ChainSource;
use crate::adapters::bitcoin::{BtcBlock, BtcTransaction};
use crate::adapters::chain::ChainAdapter;
use crate::classifier::bitcoin::{classify_block, PrevoutMap};
use crate::domain::{AddressCatalogue, Chain, Transfer};
use crate::error::Result;

/// Bitcoin unit = one block plus the previous outputs its inputs spend
pub struct BtcSource<A> {
    adapter: A,
    batch_size: u64,
}

impl<A> BtcSource<A>
where
    A: ChainAdapter<Block = BtcBlock, Transaction = BtcTransaction>,
{
    pub fn new(adapter: A, batch_size: u64) -> Self {
        Self { adapter, batch_size }
    }

    /// Look up every spent output the backend did not embed.
    ///
    /// Funding transactions inside the same block are used directly; others
    /// are fetched once each.
    async fn resolve_prevouts(&self, block: &BtcBlock) -> Result<PrevoutMap> {
        let in_block: HashMap<&str, &BtcTransaction> =
            block.txs.iter().map(|tx| (tx.txid.as_str(), tx)).collect();
        let mut fetched: HashMap<String, BtcTransaction> = HashMap::new();
        let mut prevouts = PrevoutMap::new();

        for input in block.txs.iter().flat_map(|tx| tx.inputs.iter()) {
            if !input.needs_prevout() {
                continue;
            }
            let (Some(txid), Some(vout)) = (input.txid.as_deref(), input.vout) else {
                continue;
            };

            let funding = match in_block.get(txid) {
                Some(tx) => *tx,
                None => {
                    if !fetched.contains_key(txid) {
                        let tx = self.adapter.fetch_transaction(txid).await?;
                        fetched.insert(txid.to_string(), tx);
                    }
                    match fetched.get(txid) {
                        Some(tx) => tx,
                        None => continue,
                    }
                }
            };

            match funding.output(vout) {
                Some(output) => {
                    prevouts.insert((txid.to_string(), vout), output.clone());
                }
                None => debug!("{} has no output {}", txid, vout),
            }
        }
        Ok(prevouts)
    }
}

#[async_trait]
impl<A> ChainSource for BtcSource<A>
where
    A: ChainAdapter<Block = BtcBlock, Transaction = BtcTransaction>,
{
    fn chain(&self) -> Chain {
        Chain::Btc
    }

    fn batch_size(&self) -> u64 {
        self.batch_size
    }

    async fn latest_height(&self) -> Result<u64> {
        Ok(self.adapter.latest_height().await?)
    }

    async fn transfers_in_unit(&self, height: u64, catalogue: &AddressCatalogue) -> Result<Vec<Transfer>> {
        let block = self.adapter.fetch_block(height).await?;
        let prevouts = self.resolve_prevouts(&block).await?;
        debug!(
            "block {}: {} txs, {} prevouts looked up",
            height,
            block.txs.len(),
            prevouts.len()
        );
        Ok(classify_block(&block, &prevouts, catalogue))
    }
}
