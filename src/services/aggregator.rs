//! Folds the transfer ledger into time-bucketed flow metrics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::domain::{Direction, FlowKey, FlowTotals, Transfer, Window};
use crate::error::Result;
use crate::persistence::MetricStore;

/// Result of one aggregation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    pub window: Window,
    pub transfers_read: u64,
    pub created: u64,
    pub updated: u64,
    /// Buckets written (created + updated)
    pub total: u64,
}

/// Sum deposits into inflow and withdrawals into outflow per bucket.
///
/// Deposits are attributed to the receiving exchange, withdrawals to the
/// sending one. Internal and unknown transfers produce no bucket.
pub fn fold_transfers<'a, I>(transfers: I, window: Window) -> BTreeMap<FlowKey, FlowTotals>
where
    I: IntoIterator<Item = &'a Transfer>,
{
    let mut buckets: BTreeMap<FlowKey, FlowTotals> = BTreeMap::new();

    for transfer in transfers {
        let Some(exchange_id) = transfer.flow_exchange() else {
            continue;
        };
        let key = FlowKey {
            time_bucket: window.bucket_start(transfer.timestamp),
            window,
            exchange_id,
            asset_symbol: transfer.asset_symbol.clone(),
        };
        let totals = buckets.entry(key).or_default();
        match transfer.direction {
            Direction::Deposit => totals.inflow += transfer.amount,
            Direction::Withdraw => totals.outflow += transfer.amount,
            Direction::Internal | Direction::Unknown => {}
        }
    }
    buckets
}

pub struct MetricsAggregator<S> {
    store: Arc<S>,
}

impl<S: MetricStore> MetricsAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recompute every bucket of `window` from the full ledger and upsert
    /// them in one transaction.
    #[instrument(skip(self))]
    pub async fn aggregate(&self, window: Window) -> Result<AggregateSummary> {
        let transfers = self.store.flow_transfers().await?;
        let buckets = fold_transfers(&transfers, window);
        debug!(
            "{} transfers folded into {} {} buckets",
            transfers.len(),
            buckets.len(),
            window
        );

        let counts = self.store.upsert_flow_metrics(&buckets).await?;
        let summary = AggregateSummary {
            window,
            transfers_read: transfers.len() as u64,
            created: counts.created,
            updated: counts.updated,
            total: counts.created + counts.updated,
        };
        info!(
            "aggregate {}: {} buckets ({} created, {} updated)",
            window, summary.total, summary.created, summary.updated
        );
        Ok(summary)
    }

    /// Aggregate each window in turn, stopping at the first failure
    pub async fn aggregate_all(&self) -> Result<Vec<AggregateSummary>> {
        let mut summaries = Vec::with_capacity(Window::ALL.len());
        for window in Window::ALL {
            summaries.push(self.aggregate(window).await?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Chain;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transfer(
        minute: u32,
        direction: Direction,
        amount: Decimal,
        from: Option<Uuid>,
        to: Option<Uuid>,
    ) -> Transfer {
        Transfer {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 13, minute, 0).unwrap(),
            chain: Chain::Evm,
            tx_hash: format!("0x{minute}"),
            block_number: 1,
            log_index: None,
            from_address: "0xfrom".into(),
            to_address: "0xto".into(),
            asset_symbol: "ETH".into(),
            asset_address: None,
            amount,
            direction,
            exchange_from_id: from,
            exchange_to_id: to,
        }
    }

    #[test]
    fn deposits_and_withdrawals_share_the_exchange_bucket() {
        let ex = Uuid::new_v4();
        let ledger = vec![
            transfer(1, Direction::Deposit, dec!(5), None, Some(ex)),
            transfer(20, Direction::Withdraw, dec!(2), Some(ex), None),
            transfer(40, Direction::Deposit, dec!(1.5), None, Some(ex)),
        ];
        let buckets = fold_transfers(&ledger, Window::Hour);

        assert_eq!(buckets.len(), 1);
        let (key, totals) = buckets.iter().next().unwrap();
        assert_eq!(key.exchange_id, Some(ex));
        assert_eq!(key.time_bucket, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
        assert_eq!(totals.inflow, dec!(6.5));
        assert_eq!(totals.outflow, dec!(2));
        assert_eq!(totals.netflow(), dec!(4.5));
    }

    #[test]
    fn internal_and_unknown_create_no_bucket() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ledger = vec![
            transfer(1, Direction::Internal, dec!(9), Some(a), Some(b)),
            transfer(2, Direction::Unknown, dec!(3), None, None),
        ];
        assert!(fold_transfers(&ledger, Window::Day).is_empty());
    }

    #[test]
    fn exchanges_are_bucketed_separately() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ledger = vec![
            transfer(1, Direction::Deposit, dec!(1), None, Some(a)),
            transfer(2, Direction::Deposit, dec!(2), None, Some(b)),
        ];
        let buckets = fold_transfers(&ledger, Window::Day);
        assert_eq!(buckets.len(), 2);
        assert!(buckets.values().all(|t| t.outflow.is_zero()));
    }
}
