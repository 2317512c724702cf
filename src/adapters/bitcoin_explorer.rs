//! Esplora-style REST explorer adapter.
//!
//! Explorer transactions embed each input's `prevout`, so callers never need
//! extra lookups for inputs on this backend.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::bitcoin::{btc_from_sats, BtcBlock, BtcInput, BtcOutput, BtcTransaction};
use super::json_rpc::http_client;
use crate::domain::Chain;
use crate::error::{AdapterError, AdapterErrorKind, Result};

#[derive(Debug, Deserialize)]
struct EsploraBlock {
    id: String,
    height: u64,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    #[serde(default)]
    vin: Vec<EsploraVin>,
    #[serde(default)]
    vout: Vec<EsploraVout>,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    prevout: Option<EsploraVout>,
    #[serde(default)]
    is_coinbase: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    /// Satoshis
    value: u64,
}

impl From<EsploraVout> for BtcOutput {
    fn from(out: EsploraVout) -> Self {
        BtcOutput {
            address: out.scriptpubkey_address,
            value: btc_from_sats(out.value),
        }
    }
}

impl From<EsploraTx> for BtcTransaction {
    fn from(tx: EsploraTx) -> Self {
        let inputs = tx
            .vin
            .into_iter()
            .map(|vin| {
                if vin.is_coinbase {
                    BtcInput::coinbase()
                } else {
                    BtcInput {
                        coinbase: false,
                        txid: vin.txid,
                        vout: vin.vout,
                        prevout: vin.prevout.map(BtcOutput::from),
                    }
                }
            })
            .collect();

        BtcTransaction {
            txid: tx.txid,
            inputs,
            outputs: tx.vout.into_iter().map(BtcOutput::from).collect(),
        }
    }
}

pub struct BitcoinExplorer {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BitcoinExplorer {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    #[instrument(skip(self))]
    async fn get_text(&self, method: &str, path: &str) -> std::result::Result<String, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::transport(Chain::Btc, method, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::transport(Chain::Btc, method, e))?;

        if !status.is_success() {
            return Err(AdapterError::new(
                Chain::Btc,
                method,
                AdapterErrorKind::Status {
                    status: status.as_u16(),
                    body: body.chars().take(256).collect(),
                },
            ));
        }
        debug!("GET {} -> {} bytes", path, body.len());
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
    ) -> std::result::Result<T, AdapterError> {
        let body = self.get_text(method, path).await?;
        serde_json::from_str(&body).map_err(|e| AdapterError::decode(Chain::Btc, method, e))
    }

    pub async fn latest_height(&self) -> std::result::Result<u64, AdapterError> {
        let method = "GET /blocks/tip/height";
        let body = self.get_text(method, "/blocks/tip/height").await?;
        body.trim()
            .parse()
            .map_err(|e| AdapterError::decode(Chain::Btc, method, e))
    }

    pub async fn fetch_block(&self, height: u64) -> std::result::Result<BtcBlock, AdapterError> {
        let hash = self
            .get_text("GET /block-height", &format!("/block-height/{}", height))
            .await?
            .trim()
            .to_string();
        if hash.is_empty() {
            return Err(AdapterError::missing(
                Chain::Btc,
                "GET /block-height",
                format!("no block at height {}", height),
            ));
        }

        let header: EsploraBlock = self
            .get_json("GET /block", &format!("/block/{}", hash))
            .await?;
        let txids: Vec<String> = self
            .get_json("GET /block/txids", &format!("/block/{}/txids", hash))
            .await?;

        let mut txs = Vec::with_capacity(txids.len());
        for txid in &txids {
            txs.push(self.fetch_transaction(txid).await?);
        }

        Ok(BtcBlock {
            hash: header.id,
            height: header.height,
            time: header.timestamp,
            txs,
        })
    }

    pub async fn fetch_transaction(&self, txid: &str) -> std::result::Result<BtcTransaction, AdapterError> {
        let tx: EsploraTx = self.get_json("GET /tx", &format!("/tx/{}", txid)).await?;
        Ok(tx.into())
    }
}
