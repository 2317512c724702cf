//! EVM JSON-RPC adapter
//!
//! Speaks `eth_blockNumber`, `eth_getBlockByNumber` (full transactions) and
//! `eth_getTransactionReceipt`. Payloads keep the node's hex-string encoding;
//! decoding into amounts happens in the classifier, which skips anything it
//! cannot parse.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::chain::ChainAdapter;
use super::json_rpc::JsonRpcTransport;
use crate::domain::Chain;
use crate::error::{AdapterError, Result};

/// Block as returned by `eth_getBlockByNumber(_, true)`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvmBlock {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub transactions: Vec<EvmTransaction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvmTransaction {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    /// `None` for contract creation
    #[serde(default)]
    pub to: Option<String>,
    /// Wei, hex quantity
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmReceipt {
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvmLog {
    /// Emitting contract
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_hex_u64(raw: &str) -> Option<u64> {
    let digits = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

pub struct EvmRpcClient {
    rpc: JsonRpcTransport,
}

impl EvmRpcClient {
    pub fn new(rpc_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcTransport::new(Chain::Evm, rpc_url, timeout_secs)?,
        })
    }

    pub fn rpc_url(&self) -> &str {
        self.rpc.url()
    }
}

#[async_trait]
impl ChainAdapter for EvmRpcClient {
    type Block = EvmBlock;
    type Transaction = EvmReceipt;

    fn chain(&self) -> Chain {
        Chain::Evm
    }

    async fn latest_height(&self) -> std::result::Result<u64, AdapterError> {
        let method = "eth_blockNumber";
        let hex: String = self.rpc.call(method, json!([])).await?;
        parse_hex_u64(&hex).ok_or_else(|| {
            AdapterError::decode(Chain::Evm, method, format!("bad block number {:?}", hex))
        })
    }

    async fn fetch_block(&self, height: u64) -> std::result::Result<EvmBlock, AdapterError> {
        self.rpc
            .call("eth_getBlockByNumber", json!([format!("{:#x}", height), true]))
            .await
    }

    async fn fetch_transaction(&self, id: &str) -> std::result::Result<EvmReceipt, AdapterError> {
        self.rpc.call("eth_getTransactionReceipt", json!([id])).await
    }
}
