use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::adapters::bitcoin::{BtcBlock, BtcInput, BtcOutput, BtcTransaction};
use crate::domain::{AddressCatalogue, Chain, Direction, Transfer};

/// Previous outputs fetched separately, keyed by (funding txid, vout)
pub type PrevoutMap = HashMap<(String, u32), BtcOutput>;

pub const BTC_SYMBOL: &str = "BTC";

/// Spent output of an input, from the payload itself or the lookup map
fn spent_output<'a>(input: &'a BtcInput, prevouts: &'a PrevoutMap) -> Option<&'a BtcOutput> {
    if input.coinbase {
        return None;
    }
    if let Some(prevout) = &input.prevout {
        return Some(prevout);
    }
    let key = (input.txid.clone()?, input.vout?);
    prevouts.get(&key)
}

/// Distinct catalogued addresses in discovery order, outputs first
pub fn involved_addresses(
    tx: &BtcTransaction,
    prevouts: &PrevoutMap,
    catalogue: &AddressCatalogue,
) -> Vec<String> {
    let outputs = tx.outputs.iter();
    let spent = tx.inputs.iter().filter_map(|i| spent_output(i, prevouts));

    let mut involved: Vec<String> = Vec::new();
    for output in outputs.chain(spent) {
        let Some(address) = output.address.as_deref() else {
            continue;
        };
        if catalogue.contains(address) && !involved.iter().any(|a| a == address) {
            involved.push(address.to_string());
        }
    }
    involved
}

/// One ledger row for a transaction touching the catalogue.
///
/// A single involved address is recorded as a deposit to its exchange;
/// several are recorded as internal. The amount is the full output sum.
pub fn classify_transaction(
    tx: &BtcTransaction,
    prevouts: &PrevoutMap,
    height: u64,
    timestamp: DateTime<Utc>,
    catalogue: &AddressCatalogue,
) -> Option<Transfer> {
    let involved = involved_addresses(tx, prevouts, catalogue);
    let first = involved.first()?;

    let amount: Decimal = tx.total_output();
    if amount <= Decimal::ZERO {
        debug!("tx {} touches catalogue but moves no value", tx.txid);
        return None;
    }

    let (direction, exchange_to_id) = if involved.len() == 1 {
        (
            Direction::Deposit,
            catalogue.lookup(first).map(|o| o.exchange_id),
        )
    } else {
        (Direction::Internal, None)
    };

    Some(Transfer {
        timestamp,
        chain: Chain::Btc,
        tx_hash: tx.txid.clone(),
        block_number: height,
        log_index: None,
        from_address: String::new(),
        to_address: first.clone(),
        asset_symbol: BTC_SYMBOL.to_string(),
        asset_address: None,
        amount,
        direction,
        exchange_from_id: None,
        exchange_to_id,
    })
}

/// Every catalogued transfer of a block, in block order
pub fn classify_block(
    block: &BtcBlock,
    prevouts: &PrevoutMap,
    catalogue: &AddressCatalogue,
) -> Vec<Transfer> {
    let timestamp = DateTime::<Utc>::from_timestamp(block.time, 0).unwrap_or_else(|| {
        debug!("block {} has out-of-range time {}", block.height, block.time);
        DateTime::<Utc>::default()
    });

    block
        .txs
        .iter()
        .filter_map(|tx| classify_transaction(tx, prevouts, block.height, timestamp, catalogue))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AddressLabel, LabeledAddress};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn catalogue(entries: &[(&str, Uuid)]) -> AddressCatalogue {
        let rows: Vec<LabeledAddress> = entries
            .iter()
            .map(|(address, exchange_id)| LabeledAddress {
                exchange_id: *exchange_id,
                chain: Chain::Btc,
                address: address.to_string(),
                label: AddressLabel::Deposit,
                cluster_id: None,
                is_active: true,
            })
            .collect();
        AddressCatalogue::from_addresses(Chain::Btc, &rows)
    }

    fn output(address: &str, value: Decimal) -> BtcOutput {
        BtcOutput {
            address: Some(address.to_string()),
            value,
        }
    }

    fn spend(txid: &str, vout: u32) -> BtcInput {
        BtcInput {
            coinbase: false,
            txid: Some(txid.to_string()),
            vout: Some(vout),
            prevout: None,
        }
    }

    #[test]
    fn single_catalogued_output_is_a_deposit() {
        let exchange = Uuid::new_v4();
        let cat = catalogue(&[("bc1qexchange", exchange)]);
        let tx = BtcTransaction {
            txid: "t1".into(),
            inputs: vec![spend("f0", 0)],
            outputs: vec![
                output("bc1quser", dec!(0.3)),
                output("bc1qexchange", dec!(1.2)),
            ],
        };

        let transfer = classify_transaction(&tx, &PrevoutMap::new(), 10, Utc::now(), &cat).unwrap();
        assert_eq!(transfer.direction, Direction::Deposit);
        assert_eq!(transfer.amount, dec!(1.5));
        assert_eq!(transfer.to_address, "bc1qexchange");
        assert_eq!(transfer.from_address, "");
        assert_eq!(transfer.exchange_to_id, Some(exchange));
        assert_eq!(transfer.asset_symbol, "BTC");
    }

    #[test]
    fn catalogued_input_alone_still_counts_as_deposit() {
        let exchange = Uuid::new_v4();
        let cat = catalogue(&[("bc1qhot", exchange)]);
        let tx = BtcTransaction {
            txid: "t2".into(),
            inputs: vec![spend("f1", 2)],
            outputs: vec![output("bc1quser", dec!(0.7))],
        };
        let mut prevouts = PrevoutMap::new();
        prevouts.insert(("f1".into(), 2), output("bc1qhot", dec!(0.8)));

        let transfer = classify_transaction(&tx, &prevouts, 10, Utc::now(), &cat).unwrap();
        assert_eq!(transfer.direction, Direction::Deposit);
        assert_eq!(transfer.to_address, "bc1qhot");
        assert_eq!(transfer.amount, dec!(0.7));
    }

    #[test]
    fn multiple_catalogued_addresses_are_internal_outputs_first() {
        let cat = catalogue(&[("bc1qa", Uuid::new_v4()), ("bc1qb", Uuid::new_v4())]);
        let mut input = spend("f2", 0);
        input.prevout = Some(output("bc1qa", dec!(2)));
        let tx = BtcTransaction {
            txid: "t3".into(),
            inputs: vec![input],
            outputs: vec![output("bc1qb", dec!(1.9))],
        };

        let transfer = classify_transaction(&tx, &PrevoutMap::new(), 10, Utc::now(), &cat).unwrap();
        assert_eq!(transfer.direction, Direction::Internal);
        assert_eq!(transfer.to_address, "bc1qb");
        assert_eq!(transfer.exchange_to_id, None);
    }

    #[test]
    fn coinbase_and_unrelated_transactions_are_skipped() {
        let cat = catalogue(&[("bc1qexchange", Uuid::new_v4())]);
        let block = BtcBlock {
            hash: "h".into(),
            height: 5,
            time: 1_700_000_000,
            txs: vec![
                BtcTransaction {
                    txid: "cb".into(),
                    inputs: vec![BtcInput::coinbase()],
                    outputs: vec![output("bc1qminer", dec!(3.125))],
                },
                BtcTransaction {
                    txid: "zero".into(),
                    inputs: vec![spend("f3", 0)],
                    outputs: vec![output("bc1qexchange", dec!(0))],
                },
            ],
        };
        assert!(classify_block(&block, &PrevoutMap::new(), &cat).is_empty());
    }
}
