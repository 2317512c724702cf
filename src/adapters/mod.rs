pub mod bitcoin;
pub mod bitcoin_core;
pub mod bitcoin_explorer;
pub mod chain;
pub mod evm_rpc;
pub mod json_rpc;
pub mod postgres;

pub use bitcoin::{BitcoinBackend, BtcBlock, BtcInput, BtcOutput, BtcTransaction};
pub use bitcoin_core::BitcoinCoreRpc;
pub use bitcoin_explorer::BitcoinExplorer;
pub use chain::ChainAdapter;
pub use evm_rpc::{EvmBlock, EvmLog, EvmReceipt, EvmRpcClient, EvmTransaction};
pub use json_rpc::JsonRpcTransport;
pub use postgres::{ChainLock, PostgresStore};
