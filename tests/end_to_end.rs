use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use exflow::adapters::{ChainAdapter, EvmBlock, EvmLog, EvmReceipt, EvmTransaction};
use exflow::classifier::EvmAssetParams;
use exflow::domain::{AddressLabel, Chain, Direction, LabeledAddress, Window};
use exflow::error::AdapterError;
use exflow::ingestion::{EvmSource, SyncEngine};
use exflow::persistence::MemoryStore;
use exflow::MetricsAggregator;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

const BINANCE_HOT: &str = "0x28C6c06298d514Db089934071355E5743bf21d60";
const CUSTOMER: &str = "0x2222222222222222222222222222222222222222";
const TOKEN: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
const HEIGHT: u64 = 19_775_000;
const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

fn topic_for(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
}

/// One block at 2024-05-01 12:34:56 UTC: a 2.5 ETH deposit and a token withdrawal
struct OneBlockNode;

#[async_trait]
impl ChainAdapter for OneBlockNode {
    type Block = EvmBlock;
    type Transaction = EvmReceipt;

    fn chain(&self) -> Chain {
        Chain::Evm
    }

    async fn latest_height(&self) -> Result<u64, AdapterError> {
        Ok(HEIGHT)
    }

    async fn fetch_block(&self, height: u64) -> Result<EvmBlock, AdapterError> {
        if height != HEIGHT {
            return Ok(EvmBlock {
                number: Some(format!("{:#x}", height)),
                hash: Some(format!("0x{:x}", height)),
                timestamp: Some("0x0".into()),
                transactions: vec![],
            });
        }
        Ok(EvmBlock {
            number: Some(format!("{:#x}", HEIGHT)),
            hash: Some("0xblockhash".into()),
            timestamp: Some(format!("{:#x}", 1_714_566_896u64)),
            transactions: vec![
                EvmTransaction {
                    hash: Some("0xdeposit".into()),
                    from: Some(CUSTOMER.into()),
                    to: Some(BINANCE_HOT.into()),
                    value: Some("0x22b1c8c1227a0000".into()),
                },
                EvmTransaction {
                    hash: Some("0xtoken".into()),
                    from: Some(BINANCE_HOT.into()),
                    to: Some(TOKEN.into()),
                    value: Some("0x0".into()),
                },
            ],
        })
    }

    async fn fetch_transaction(&self, id: &str) -> Result<EvmReceipt, AdapterError> {
        let logs = if id == "0xtoken" {
            vec![EvmLog {
                address: Some(TOKEN.into()),
                topics: vec![
                    TRANSFER_TOPIC.into(),
                    topic_for(BINANCE_HOT),
                    topic_for(CUSTOMER),
                ],
                // 4 tokens at 18 decimals
                data: Some(format!("0x{:064x}", 4_000_000_000_000_000_000u128)),
            }]
        } else {
            vec![]
        };
        Ok(EvmReceipt {
            transaction_hash: Some(id.to_string()),
            logs,
        })
    }
}

#[tokio::test]
async fn deposit_flows_from_block_to_hourly_metric() {
    let store = Arc::new(MemoryStore::new());
    let binance = Uuid::new_v4();
    store
        .add_address(LabeledAddress {
            exchange_id: binance,
            chain: Chain::Evm,
            address: BINANCE_HOT.to_string(),
            label: AddressLabel::Hot,
            cluster_id: None,
            is_active: true,
        })
        .await;
    store.set_cursor(Chain::Evm, Some(HEIGHT - 1)).await;

    let engine = SyncEngine::new(
        EvmSource::new(OneBlockNode, EvmAssetParams::default(), 100),
        Arc::clone(&store),
    );
    let outcome = engine.sync().await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(outcome.cursor, Some(HEIGHT));
    assert_eq!(outcome.transfers_emitted, 2);

    let transfers = store.transfers().await;
    let deposit = transfers.iter().find(|t| t.tx_hash == "0xdeposit").unwrap();
    assert_eq!(deposit.direction, Direction::Deposit);
    assert_eq!(deposit.amount, dec!(2.5));
    assert_eq!(deposit.asset_symbol, "ETH");
    assert_eq!(deposit.exchange_to_id, Some(binance));
    assert_eq!(deposit.log_index, None);
    assert_eq!(
        deposit.timestamp,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap()
    );

    let token = transfers.iter().find(|t| t.tx_hash == "0xtoken").unwrap();
    assert_eq!(token.direction, Direction::Withdraw);
    assert_eq!(token.log_index, Some(0));
    assert_eq!(token.amount, dec!(4));
    assert_eq!(token.asset_address.as_deref(), Some(TOKEN));
    assert_eq!(token.exchange_from_id, Some(binance));

    MetricsAggregator::new(Arc::clone(&store))
        .aggregate(Window::Hour)
        .await
        .unwrap();

    let metrics = store.metrics().await;
    let eth = metrics
        .iter()
        .find(|m| m.asset_symbol == "ETH")
        .expect("ETH bucket");
    assert_eq!(metrics.len(), 2);
    assert_eq!(eth.time_bucket, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    assert_eq!(eth.exchange_id, Some(binance));
    assert_eq!(eth.inflow, dec!(2.5));
    assert_eq!(eth.outflow, dec!(0));
    assert_eq!(eth.netflow, dec!(2.5));
}
