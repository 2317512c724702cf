//! In-memory store with the same transactional guarantees as Postgres.
//!
//! Used by tests and dry runs. Every trait call takes one lock, so each call
//! is atomic with respect to the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AlertStore, CatalogueProvider, MetricStore, SyncStore, UpsertCounts};
use crate::domain::{
    Alert, Chain, Direction, FlowKey, FlowMetric, FlowTotals, LabeledAddress, SyncState, Transfer,
    Window,
};
use crate::error::{FlowError, Result};

#[derive(Default)]
struct Inner {
    addresses: Vec<LabeledAddress>,
    sync_states: HashMap<Chain, SyncState>,
    transfers: Vec<Transfer>,
    transfer_keys: HashSet<(Chain, String, Option<u32>)>,
    metrics: BTreeMap<FlowKey, FlowMetric>,
    alerts: Vec<Alert>,
    fail_commit: Option<(Chain, u64)>,
    fail_upsert: bool,
    fail_alerts: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_address(&self, address: LabeledAddress) {
        self.inner.lock().await.addresses.push(address);
    }

    /// Seed a cursor as if earlier syncs had committed up to it
    pub async fn set_cursor(&self, chain: Chain, cursor: Option<u64>) {
        let mut inner = self.inner.lock().await;
        inner.sync_states.insert(
            chain,
            SyncState {
                chain,
                cursor,
                updated_at: Utc::now(),
            },
        );
    }

    /// Append a ledger row directly, bypassing the sync path
    pub async fn push_transfer(&self, transfer: Transfer) {
        let mut inner = self.inner.lock().await;
        let key = (transfer.chain, transfer.tx_hash.clone(), transfer.log_index);
        if inner.transfer_keys.insert(key) {
            inner.transfers.push(transfer);
        }
    }

    /// Seed a metric row directly
    pub async fn put_metric(&self, metric: FlowMetric) {
        let mut inner = self.inner.lock().await;
        inner.metrics.insert(metric.key(), metric);
    }

    /// Make the commit of `unit` on `chain` fail
    pub async fn fail_commit_at(&self, chain: Chain, unit: u64) {
        self.inner.lock().await.fail_commit = Some((chain, unit));
    }

    /// Make the next metric upserts fail
    pub async fn fail_upserts(&self, fail: bool) {
        self.inner.lock().await.fail_upsert = fail;
    }

    /// Make the next alert inserts fail
    pub async fn fail_alert_inserts(&self, fail: bool) {
        self.inner.lock().await.fail_alerts = fail;
    }

    pub async fn transfers(&self) -> Vec<Transfer> {
        self.inner.lock().await.transfers.clone()
    }

    pub async fn metrics(&self) -> Vec<FlowMetric> {
        self.inner.lock().await.metrics.values().cloned().collect()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().await.alerts.clone()
    }

    pub async fn cursor(&self, chain: Chain) -> Option<u64> {
        self.inner
            .lock()
            .await
            .sync_states
            .get(&chain)
            .and_then(|s| s.cursor)
    }
}

#[async_trait]
impl CatalogueProvider for MemoryStore {
    async fn active_addresses(&self, chain: Chain) -> Result<Vec<LabeledAddress>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .addresses
            .iter()
            .filter(|a| a.chain == chain && a.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn load_sync_state(&self, chain: Chain) -> Result<Option<SyncState>> {
        Ok(self.inner.lock().await.sync_states.get(&chain).cloned())
    }

    async fn init_sync_state(&self, chain: Chain) -> Result<SyncState> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .sync_states
            .entry(chain)
            .or_insert_with(|| SyncState::new(chain))
            .clone())
    }

    async fn commit_unit(&self, chain: Chain, unit: u64, transfers: &[Transfer]) -> Result<u64> {
        let mut inner = self.inner.lock().await;

        if inner.fail_commit == Some((chain, unit)) {
            return Err(FlowError::Persistence(format!(
                "injected commit failure for {} unit {}",
                chain, unit
            )));
        }
        if let Some(current) = inner.sync_states.get(&chain).and_then(|s| s.cursor) {
            if current >= unit {
                return Err(FlowError::Persistence(format!(
                    "{} cursor would move from {} to {}",
                    chain, current, unit
                )));
            }
        }

        let mut inserted = 0;
        for transfer in transfers {
            let key = (transfer.chain, transfer.tx_hash.clone(), transfer.log_index);
            if inner.transfer_keys.insert(key) {
                inner.transfers.push(transfer.clone());
                inserted += 1;
            }
        }
        inner.sync_states.insert(
            chain,
            SyncState {
                chain,
                cursor: Some(unit),
                updated_at: Utc::now(),
            },
        );
        Ok(inserted)
    }

    async fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let inner = self.inner.lock().await;
        let mut states: Vec<SyncState> = inner.sync_states.values().cloned().collect();
        states.sort_by_key(|s| s.chain);
        Ok(states)
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn flow_transfers(&self) -> Result<Vec<Transfer>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transfers
            .iter()
            .filter(|t| matches!(t.direction, Direction::Deposit | Direction::Withdraw))
            .cloned()
            .collect())
    }

    async fn upsert_flow_metrics(&self, buckets: &BTreeMap<FlowKey, FlowTotals>) -> Result<UpsertCounts> {
        let mut inner = self.inner.lock().await;
        if inner.fail_upsert {
            return Err(FlowError::Persistence("injected upsert failure".to_string()));
        }

        let now = Utc::now();
        let mut counts = UpsertCounts::default();
        for (key, totals) in buckets {
            match inner.metrics.get_mut(key) {
                Some(row) => {
                    row.inflow = totals.inflow;
                    row.outflow = totals.outflow;
                    row.netflow = totals.netflow();
                    row.updated_at = now;
                    counts.updated += 1;
                }
                None => {
                    inner.metrics.insert(
                        key.clone(),
                        FlowMetric {
                            time_bucket: key.time_bucket,
                            window: key.window,
                            exchange_id: key.exchange_id,
                            asset_symbol: key.asset_symbol.clone(),
                            inflow: totals.inflow,
                            outflow: totals.outflow,
                            netflow: totals.netflow(),
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    counts.created += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn flow_metrics_since(&self, window: Window, since: DateTime<Utc>) -> Result<Vec<FlowMetric>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .metrics
            .values()
            .filter(|m| m.window == window && m.time_bucket >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn alert_exists(
        &self,
        exchange_id: Option<Uuid>,
        asset_symbol: &str,
        window: Window,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.alerts.iter().any(|a| {
            a.exchange_id == exchange_id
                && a.asset_symbol == asset_symbol
                && a.window == window
                && a.time_bucket >= from
                && a.time_bucket < to
        }))
    }

    async fn insert_alerts(&self, alerts: &[Alert]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_alerts {
            return Err(FlowError::Persistence("injected alert insert failure".to_string()));
        }
        inner.alerts.extend_from_slice(alerts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer(tx: &str, log_index: Option<u32>) -> Transfer {
        Transfer {
            timestamp: Utc::now(),
            chain: Chain::Evm,
            tx_hash: tx.to_string(),
            block_number: 1,
            log_index,
            from_address: "0x01".into(),
            to_address: "0x02".into(),
            asset_symbol: "ETH".into(),
            asset_address: None,
            amount: dec!(1),
            direction: Direction::Deposit,
            exchange_from_id: None,
            exchange_to_id: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn commit_ignores_duplicate_natural_keys() {
        let store = MemoryStore::new();
        let batch = vec![transfer("0xa", None), transfer("0xa", Some(0)), transfer("0xa", None)];

        let inserted = store.commit_unit(Chain::Evm, 5, &batch).await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.cursor(Chain::Evm).await, Some(5));
    }

    #[tokio::test]
    async fn commit_rejects_cursor_regression_without_writing() {
        let store = MemoryStore::new();
        store.set_cursor(Chain::Evm, Some(10)).await;

        let result = store
            .commit_unit(Chain::Evm, 10, &[transfer("0xb", None)])
            .await;
        assert!(matches!(result, Err(FlowError::Persistence(_))));
        assert!(store.transfers().await.is_empty());
        assert_eq!(store.cursor(Chain::Evm).await, Some(10));
    }

    #[tokio::test]
    async fn init_sync_state_is_lazy_and_idempotent() {
        let store = MemoryStore::new();
        assert!(store.load_sync_state(Chain::Btc).await.unwrap().is_none());

        let state = store.init_sync_state(Chain::Btc).await.unwrap();
        assert_eq!(state.cursor, None);
        store.commit_unit(Chain::Btc, 3, &[]).await.unwrap();

        let again = store.init_sync_state(Chain::Btc).await.unwrap();
        assert_eq!(again.cursor, Some(3));
    }
}
