use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

use super::{EvmAssetParams, Endpoints};
use crate::adapters::evm_rpc::{parse_hex_u64, EvmBlock, EvmLog, EvmReceipt, EvmTransaction};
use crate::domain::{AddressCatalogue, Chain, Transfer};

mod erc20 {
    alloy::sol! {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// keccak256("Transfer(address,address,uint256)")
pub fn transfer_topic() -> B256 {
    erc20::Transfer::SIGNATURE_HASH
}

/// Placeholder symbol for a token contract
pub fn token_symbol(contract: &str) -> String {
    let lower = contract.trim().to_ascii_lowercase();
    let prefix: String = lower.chars().take(8).collect();
    format!("ERC20_{}", prefix)
}

fn parse_u256(raw: &str) -> Option<U256> {
    let digits = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());
    if digits.is_empty() {
        return None;
    }
    U256::from_str_radix(digits, 16).ok()
}

/// Integer digits the ledger amount column holds (NUMERIC(36, 18))
const LEDGER_INTEGER_DIGITS: u32 = 18;

/// Scale a raw integer amount by `10^decimals`.
///
/// Low-order digits are dropped until the integer fits a decimal mantissa
/// (96 bits, scale at most 28). `None` when the amount exceeds the ledger's
/// integer precision.
pub fn scale_amount(raw: U256, decimals: u32) -> Option<Decimal> {
    let ten = U256::from(10u8);
    let mut mantissa = raw;
    let mut scale = decimals;
    while mantissa.bit_len() > 96 || scale > Decimal::MAX_SCALE {
        if scale == 0 {
            return None;
        }
        mantissa /= ten;
        scale -= 1;
    }
    let limbs = mantissa.as_limbs();
    let mantissa = (u128::from(limbs[1]) << 64) | u128::from(limbs[0]);
    let amount = Decimal::try_from_i128_with_scale(mantissa as i128, scale).ok()?;

    let limit = Decimal::from(10u64.pow(LEDGER_INTEGER_DIGITS));
    (amount < limit).then_some(amount)
}

fn format_address(address: Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Block number and timestamp, or `None` if the header is unusable
pub fn block_header(block: &EvmBlock) -> Option<(u64, DateTime<Utc>)> {
    let number = parse_hex_u64(block.number.as_deref()?)?;
    let secs = parse_hex_u64(block.timestamp.as_deref()?)?;
    let timestamp = DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)?;
    Some((number, timestamp))
}

/// Native-value transfer carried by a transaction, if it touches the catalogue
pub fn classify_native(
    tx: &EvmTransaction,
    block_number: u64,
    timestamp: DateTime<Utc>,
    catalogue: &AddressCatalogue,
    params: &EvmAssetParams,
) -> Option<Transfer> {
    // Contract creation has no `to`
    let to = tx.to.as_deref()?;
    let from = tx.from.as_deref()?;
    let hash = tx.hash.as_deref()?;

    let wei = parse_u256(tx.value.as_deref()?)?;
    if wei.is_zero() {
        return None;
    }

    let endpoints = Endpoints::resolve(catalogue, from, to);
    if !endpoints.is_relevant() {
        return None;
    }

    let Some(amount) = scale_amount(wei, params.native_decimals) else {
        warn!("skipping native transfer {}: value {} out of range", hash, wei);
        return None;
    };

    Some(Transfer {
        timestamp,
        chain: Chain::Evm,
        tx_hash: hash.to_string(),
        block_number,
        log_index: None,
        from_address: Chain::Evm.normalize_address(from),
        to_address: Chain::Evm.normalize_address(to),
        asset_symbol: params.native_symbol.clone(),
        asset_address: None,
        amount,
        direction: endpoints.direction,
        exchange_from_id: endpoints.exchange_from_id,
        exchange_to_id: endpoints.exchange_to_id,
    })
}

/// Decode one log as an ERC-20 `Transfer`: (from, to, raw amount)
fn decode_transfer_log(log: &EvmLog) -> Option<(String, String, U256)> {
    if log.topics.len() < 3 {
        return None;
    }
    let topic0 = B256::from_str(&log.topics[0]).ok()?;
    if topic0 != transfer_topic() {
        return None;
    }
    let from = Address::from_word(B256::from_str(&log.topics[1]).ok()?);
    let to = Address::from_word(B256::from_str(&log.topics[2]).ok()?);
    let value = parse_u256(log.data.as_deref()?)?;
    Some((format_address(from), format_address(to), value))
}

/// ERC-20 transfers in a receipt that touch the catalogue
pub fn classify_receipt(
    receipt: &EvmReceipt,
    block_number: u64,
    timestamp: DateTime<Utc>,
    catalogue: &AddressCatalogue,
    params: &EvmAssetParams,
) -> Vec<Transfer> {
    let Some(hash) = receipt.transaction_hash.as_deref() else {
        debug!("receipt without transactionHash in block {}", block_number);
        return Vec::new();
    };

    let mut transfers = Vec::new();
    for (position, log) in receipt.logs.iter().enumerate() {
        let Some((from, to, raw)) = decode_transfer_log(log) else {
            continue;
        };
        let Some(contract) = log.address.as_deref() else {
            continue;
        };

        let endpoints = Endpoints::resolve(catalogue, &from, &to);
        if !endpoints.is_relevant() {
            continue;
        }

        let Some(amount) = scale_amount(raw, params.token_decimals) else {
            warn!(
                "skipping token transfer {}#{}: amount {} out of range",
                hash, position, raw
            );
            continue;
        };
        let Ok(log_index) = u32::try_from(position) else {
            continue;
        };

        let contract = Chain::Evm.normalize_address(contract);
        transfers.push(Transfer {
            timestamp,
            chain: Chain::Evm,
            tx_hash: hash.to_string(),
            block_number,
            log_index: Some(log_index),
            from_address: from,
            to_address: to,
            asset_symbol: token_symbol(&contract),
            asset_address: Some(contract),
            amount,
            direction: endpoints.direction,
            exchange_from_id: endpoints.exchange_from_id,
            exchange_to_id: endpoints.exchange_to_id,
        });
    }
    transfers
}

/// All catalogued transfers of one block: native moves first, then token
/// logs in receipt order.
pub fn classify_block(
    block: &EvmBlock,
    receipts: &[EvmReceipt],
    height: u64,
    catalogue: &AddressCatalogue,
    params: &EvmAssetParams,
) -> Vec<Transfer> {
    let Some((number, timestamp)) = block_header(block) else {
        warn!("block {} has an unreadable header; nothing classified", height);
        return Vec::new();
    };
    if number != height {
        debug!("block header number {} differs from requested {}", number, height);
    }

    let mut transfers: Vec<Transfer> = block
        .transactions
        .iter()
        .filter_map(|tx| classify_native(tx, height, timestamp, catalogue, params))
        .collect();

    for receipt in receipts {
        transfers.extend(classify_receipt(receipt, height, timestamp, catalogue, params));
    }
    transfers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AddressLabel, Direction, LabeledAddress};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const BINANCE: &str = "0x28c6c06298d514db089934071355e5743bf21d60";
    const USER: &str = "0x1111111111111111111111111111111111111111";
    const TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

    fn catalogue(exchange: Uuid) -> AddressCatalogue {
        let rows = vec![LabeledAddress {
            exchange_id: exchange,
            chain: Chain::Evm,
            address: BINANCE.to_string(),
            label: AddressLabel::Hot,
            cluster_id: None,
            is_active: true,
        }];
        AddressCatalogue::from_addresses(Chain::Evm, &rows)
    }

    fn topic_for(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn block(txs: Vec<EvmTransaction>) -> EvmBlock {
        EvmBlock {
            number: Some("0x64".into()),
            hash: Some("0xblock".into()),
            timestamp: Some("0x65f0a3c0".into()),
            transactions: txs,
        }
    }

    #[test]
    fn transfer_topic_matches_erc20_signature() {
        assert_eq!(
            format!("{:?}", transfer_topic()),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn placeholder_symbol_uses_lowercased_prefix() {
        assert_eq!(token_symbol(TOKEN), "ERC20_0xa0b869");
    }

    #[test]
    fn native_deposit_is_scaled_from_wei() {
        let exchange = Uuid::new_v4();
        let tx = EvmTransaction {
            hash: Some("0xdeposit".into()),
            from: Some(USER.into()),
            to: Some(BINANCE.to_uppercase().replace("0X", "0x")),
            // 2.5 ETH
            value: Some("0x22b1c8c1227a0000".into()),
        };
        let transfers = classify_block(
            &block(vec![tx]),
            &[],
            100,
            &catalogue(exchange),
            &EvmAssetParams::default(),
        );

        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.direction, Direction::Deposit);
        assert_eq!(t.amount, dec!(2.5));
        assert_eq!(t.asset_symbol, "ETH");
        assert_eq!(t.to_address, BINANCE);
        assert_eq!(t.exchange_to_id, Some(exchange));
        assert_eq!(t.log_index, None);
        assert_eq!(t.block_number, 100);
    }

    #[test]
    fn zero_value_contract_creation_and_strangers_are_skipped() {
        let txs = vec![
            EvmTransaction {
                hash: Some("0x01".into()),
                from: Some(USER.into()),
                to: Some(BINANCE.into()),
                value: Some("0x0".into()),
            },
            EvmTransaction {
                hash: Some("0x02".into()),
                from: Some(BINANCE.into()),
                to: None,
                value: Some("0x10".into()),
            },
            EvmTransaction {
                hash: Some("0x03".into()),
                from: Some(USER.into()),
                to: Some("0x2222222222222222222222222222222222222222".into()),
                value: Some("0x10".into()),
            },
            EvmTransaction {
                hash: Some("0x04".into()),
                from: Some(USER.into()),
                to: Some(BINANCE.into()),
                value: Some("not-hex".into()),
            },
        ];
        let transfers = classify_block(
            &block(txs),
            &[],
            100,
            &catalogue(Uuid::new_v4()),
            &EvmAssetParams::default(),
        );
        assert!(transfers.is_empty());
    }

    #[test]
    fn token_withdrawal_uses_log_position_and_placeholder_symbol() {
        let exchange = Uuid::new_v4();
        let transfer_log = EvmLog {
            address: Some(TOKEN.into()),
            topics: vec![
                format!("{:?}", transfer_topic()),
                topic_for(BINANCE),
                topic_for(USER),
            ],
            // 1e18 -> 1.0
            data: Some(format!("0x{:0>64}", "de0b6b3a7640000")),
        };
        let unrelated = EvmLog {
            address: Some(TOKEN.into()),
            topics: vec!["0x01".into()],
            data: Some("0x".into()),
        };
        let receipt = EvmReceipt {
            transaction_hash: Some("0xtoken".into()),
            logs: vec![unrelated, transfer_log],
        };

        let transfers = classify_receipt(
            &receipt,
            7,
            Utc::now(),
            &catalogue(exchange),
            &EvmAssetParams::default(),
        );
        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.direction, Direction::Withdraw);
        assert_eq!(t.log_index, Some(1));
        assert_eq!(t.amount, dec!(1));
        assert_eq!(t.from_address, BINANCE);
        assert_eq!(t.to_address, USER);
        assert_eq!(t.asset_symbol, "ERC20_0xa0b869");
        assert_eq!(t.asset_address.as_deref(), Some(TOKEN.to_ascii_lowercase().as_str()));
        assert_eq!(t.exchange_from_id, Some(exchange));
    }

    #[test]
    fn amount_beyond_ledger_precision_is_skipped() {
        let log = EvmLog {
            address: Some(TOKEN.into()),
            topics: vec![
                format!("{:?}", transfer_topic()),
                topic_for(USER),
                topic_for(BINANCE),
            ],
            data: Some(format!("0x{}", "f".repeat(64))),
        };
        let receipt = EvmReceipt {
            transaction_hash: Some("0xhuge".into()),
            logs: vec![log],
        };
        let transfers = classify_receipt(
            &receipt,
            7,
            Utc::now(),
            &catalogue(Uuid::new_v4()),
            &EvmAssetParams::default(),
        );
        assert!(transfers.is_empty());
    }

    #[test]
    fn unreadable_header_yields_nothing() {
        let mut b = block(vec![]);
        b.timestamp = None;
        assert!(block_header(&b).is_none());
        assert!(classify_block(
            &b,
            &[],
            1,
            &catalogue(Uuid::new_v4()),
            &EvmAssetParams::default()
        )
        .is_empty());
    }

    #[test]
    fn large_amounts_keep_their_integer_part() {
        let raw = U256::from(10u8).pow(U256::from(29u8));
        assert_eq!(scale_amount(raw, 18), Some(dec!(100000000000)));

        let odd = raw + U256::from(123_456_789u64);
        let scaled = scale_amount(odd, 18).unwrap();
        assert_eq!(scaled.trunc(), dec!(100000000000));
        assert!(scaled >= dec!(100000000000));

        let too_big = U256::from(10u8).pow(U256::from(36u8));
        assert_eq!(scale_amount(too_big, 18), None);
    }

    #[test]
    fn excess_decimals_fold_into_max_scale() {
        assert_eq!(scale_amount(U256::from(15u8), 30), Some(dec!(0)));
        assert_eq!(
            scale_amount(U256::from(10u8).pow(U256::from(30u8)), 30),
            Some(dec!(1))
        );
    }
}
