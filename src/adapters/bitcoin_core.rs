//! Bitcoin Core full-node adapter (JSON-RPC with basic auth)

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::bitcoin::{btc_from_number, BtcBlock, BtcInput, BtcOutput, BtcTransaction};
use super::json_rpc::JsonRpcTransport;
use crate::domain::Chain;
use crate::error::{AdapterError, Result};

#[derive(Debug, Deserialize)]
struct CoreBlock {
    hash: String,
    height: u64,
    time: i64,
    #[serde(default)]
    tx: Vec<CoreTx>,
}

#[derive(Debug, Deserialize)]
struct CoreTx {
    txid: String,
    #[serde(default)]
    vin: Vec<CoreVin>,
    #[serde(default)]
    vout: Vec<CoreVout>,
}

#[derive(Debug, Deserialize)]
struct CoreVin {
    #[serde(default)]
    coinbase: Option<String>,
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CoreVout {
    value: serde_json::Number,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: CoreScript,
}

/// Newer nodes report `address`, older ones an `addresses` list
#[derive(Debug, Default, Deserialize)]
struct CoreScript {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addresses: Vec<String>,
}

impl CoreScript {
    fn into_address(self) -> Option<String> {
        self.address.or_else(|| self.addresses.into_iter().next())
    }
}

impl CoreTx {
    fn normalize(self, method: &str) -> std::result::Result<BtcTransaction, AdapterError> {
        let inputs = self
            .vin
            .into_iter()
            .map(|vin| {
                if vin.coinbase.is_some() {
                    BtcInput::coinbase()
                } else {
                    BtcInput {
                        coinbase: false,
                        txid: vin.txid,
                        vout: vin.vout,
                        prevout: None,
                    }
                }
            })
            .collect();

        let mut outputs = Vec::with_capacity(self.vout.len());
        for out in self.vout {
            let value = btc_from_number(&out.value).ok_or_else(|| {
                AdapterError::decode(
                    Chain::Btc,
                    method,
                    format!("bad output value {} in {}", out.value, self.txid),
                )
            })?;
            outputs.push(BtcOutput {
                address: out.script_pub_key.into_address(),
                value,
            });
        }

        Ok(BtcTransaction {
            txid: self.txid,
            inputs,
            outputs,
        })
    }
}

pub struct BitcoinCoreRpc {
    rpc: JsonRpcTransport,
}

impl BitcoinCoreRpc {
    pub fn new(rpc_url: &str, user: &str, pass: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcTransport::new(Chain::Btc, rpc_url, timeout_secs)?
                .with_basic_auth(user, pass),
        })
    }

    pub async fn latest_height(&self) -> std::result::Result<u64, AdapterError> {
        self.rpc.call("getblockcount", json!([])).await
    }

    pub async fn fetch_block(&self, height: u64) -> std::result::Result<BtcBlock, AdapterError> {
        let hash: String = self.rpc.call("getblockhash", json!([height])).await?;
        let block: CoreBlock = self.rpc.call("getblock", json!([hash, 2])).await?;
        debug!("getblock {} -> {} txs", block.height, block.tx.len());

        let txs = block
            .tx
            .into_iter()
            .map(|tx| tx.normalize("getblock"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(BtcBlock {
            hash: block.hash,
            height: block.height,
            time: block.time,
            txs,
        })
    }

    pub async fn fetch_transaction(&self, txid: &str) -> std::result::Result<BtcTransaction, AdapterError> {
        let method = "getrawtransaction";
        let tx: CoreTx = self.rpc.call(method, json!([txid, true])).await?;
        tx.normalize(method)
    }
}
