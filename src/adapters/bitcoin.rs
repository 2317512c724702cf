//! Shared Bitcoin payload types and backend selection.
//!
//! Both backends normalize into [`BtcBlock`] / [`BtcTransaction`] with values
//! already expressed in BTC, so the classifier never sees which one answered.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use super::bitcoin_core::BitcoinCoreRpc;
use super::bitcoin_explorer::BitcoinExplorer;
use super::chain::ChainAdapter;
use crate::config::{BtcConfig, BtcMode, HttpConfig};
use crate::domain::Chain;
use crate::error::{AdapterError, FlowError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcBlock {
    pub hash: String,
    pub height: u64,
    /// Block header time, unix seconds
    pub time: i64,
    pub txs: Vec<BtcTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcTransaction {
    pub txid: String,
    pub inputs: Vec<BtcInput>,
    pub outputs: Vec<BtcOutput>,
}

impl BtcTransaction {
    /// Output by its index within the transaction
    pub fn output(&self, vout: u32) -> Option<&BtcOutput> {
        self.outputs.get(vout as usize)
    }

    pub fn total_output(&self) -> Decimal {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcInput {
    pub coinbase: bool,
    /// Funding transaction; absent for coinbase
    pub txid: Option<String>,
    pub vout: Option<u32>,
    /// Spent output when the backend already resolved it
    pub prevout: Option<BtcOutput>,
}

impl BtcInput {
    pub fn coinbase() -> Self {
        Self {
            coinbase: true,
            txid: None,
            vout: None,
            prevout: None,
        }
    }

    /// Input whose spent output still has to be fetched
    pub fn needs_prevout(&self) -> bool {
        !self.coinbase && self.prevout.is_none() && self.txid.is_some() && self.vout.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcOutput {
    /// `None` for non-standard scripts (OP_RETURN, bare multisig)
    pub address: Option<String>,
    /// BTC
    pub value: Decimal,
}

/// Convert a JSON number carrying a BTC amount without going through `f64`
pub(crate) fn btc_from_number(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Convert satoshis to BTC
pub(crate) fn btc_from_sats(sats: u64) -> Decimal {
    Decimal::from_i128_with_scale(sats as i128, 8)
}

/// Bitcoin backend fixed at process start
pub enum BitcoinBackend {
    CoreRpc(BitcoinCoreRpc),
    Explorer(BitcoinExplorer),
}

impl BitcoinBackend {
    pub fn from_config(btc: &BtcConfig, http: &HttpConfig) -> Result<Self> {
        if !btc.enabled {
            return Err(FlowError::Configuration(
                "BTC ingestion is disabled (btc.enabled = false)".to_string(),
            ));
        }
        let backend = match btc.mode {
            BtcMode::CoreRpc => {
                if btc.rpc_url.trim().is_empty() {
                    return Err(FlowError::Configuration(
                        "btc.rpc_url is required for BTC mode CORE_RPC".to_string(),
                    ));
                }
                BitcoinBackend::CoreRpc(BitcoinCoreRpc::new(
                    &btc.rpc_url,
                    &btc.rpc_user,
                    &btc.rpc_pass,
                    http.timeout_secs,
                )?)
            }
            BtcMode::Explorer => {
                if btc.explorer_base_url.trim().is_empty() {
                    return Err(FlowError::Configuration(
                        "btc.explorer_base_url is required for BTC mode EXPLORER".to_string(),
                    ));
                }
                BitcoinBackend::Explorer(BitcoinExplorer::new(
                    &btc.explorer_base_url,
                    btc.explorer_api_key.clone(),
                    http.timeout_secs,
                )?)
            }
        };
        info!("BTC backend: {}", backend.mode().as_str());
        Ok(backend)
    }

    pub fn mode(&self) -> BtcMode {
        match self {
            BitcoinBackend::CoreRpc(_) => BtcMode::CoreRpc,
            BitcoinBackend::Explorer(_) => BtcMode::Explorer,
        }
    }
}

#[async_trait]
impl ChainAdapter for BitcoinBackend {
    type Block = BtcBlock;
    type Transaction = BtcTransaction;

    fn chain(&self) -> Chain {
        Chain::Btc
    }

    async fn latest_height(&self) -> std::result::Result<u64, AdapterError> {
        match self {
            BitcoinBackend::CoreRpc(core) => core.latest_height().await,
            BitcoinBackend::Explorer(explorer) => explorer.latest_height().await,
        }
    }

    async fn fetch_block(&self, height: u64) -> std::result::Result<BtcBlock, AdapterError> {
        match self {
            BitcoinBackend::CoreRpc(core) => core.fetch_block(height).await,
            BitcoinBackend::Explorer(explorer) => explorer.fetch_block(height).await,
        }
    }

    async fn fetch_transaction(&self, id: &str) -> std::result::Result<BtcTransaction, AdapterError> {
        match self {
            BitcoinBackend::CoreRpc(core) => core.fetch_transaction(id).await,
            BitcoinBackend::Explorer(explorer) => explorer.fetch_transaction(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sats_convert_to_btc() {
        assert_eq!(btc_from_sats(150_000_000), dec!(1.5));
        assert_eq!(btc_from_sats(1), dec!(0.00000001));
    }

    #[test]
    fn json_numbers_convert_exactly() {
        let n: serde_json::Number = serde_json::from_str("0.1").unwrap();
        assert_eq!(btc_from_number(&n), Some(dec!(0.1)));
        let n: serde_json::Number = serde_json::from_str("1e-8").unwrap();
        assert_eq!(btc_from_number(&n), Some(dec!(0.00000001)));
    }

    #[test]
    fn backend_follows_configured_mode() {
        let http = HttpConfig::default();
        let mut btc = BtcConfig {
            rpc_url: "http://127.0.0.1:8332".to_string(),
            ..BtcConfig::default()
        };
        let core = BitcoinBackend::from_config(&btc, &http).unwrap();
        assert_eq!(core.mode(), BtcMode::CoreRpc);

        btc.mode = BtcMode::Explorer;
        assert!(matches!(
            BitcoinBackend::from_config(&btc, &http),
            Err(FlowError::Configuration(_))
        ));

        btc.explorer_base_url = "https://blockstream.info/api".to_string();
        let explorer = BitcoinBackend::from_config(&btc, &http).unwrap();
        assert_eq!(explorer.mode(), BtcMode::Explorer);
    }

    #[test]
    fn coinbase_inputs_never_need_lookup() {
        assert!(!BtcInput::coinbase().needs_prevout());
        let spend = BtcInput {
            coinbase: false,
            txid: Some("ab".into()),
            vout: Some(0),
            prevout: None,
        };
        assert!(spend.needs_prevout());
    }
}
