//! Storage seams.
//!
//! The pipeline talks to storage only through these traits, implemented by
//! [`crate::adapters::PostgresStore`] and by the in-memory [`MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{Alert, Chain, FlowKey, FlowMetric, FlowTotals, LabeledAddress, SyncState, Transfer, Window};
use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Labeled-address catalogue owned by an external collaborator
#[async_trait]
pub trait CatalogueProvider: Send + Sync {
    /// Active rows for one chain
    async fn active_addresses(&self, chain: Chain) -> Result<Vec<LabeledAddress>>;
}

/// Cursor and raw transfer ledger
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn load_sync_state(&self, chain: Chain) -> Result<Option<SyncState>>;

    /// Create the state row with an empty cursor if it does not exist yet
    async fn init_sync_state(&self, chain: Chain) -> Result<SyncState>;

    /// Append a unit's transfers and move the cursor to `unit`, atomically.
    ///
    /// Transfers whose natural key is already present are ignored. Fails
    /// without writing anything if the cursor would not move forward.
    /// Returns how many transfers were newly inserted.
    async fn commit_unit(&self, chain: Chain, unit: u64, transfers: &[Transfer]) -> Result<u64>;

    async fn list_sync_states(&self) -> Result<Vec<SyncState>>;
}

/// Result of a bucket upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub created: u64,
    pub updated: u64,
}

/// Ledger reads plus the flow metric table
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Every ledger row that contributes to a bucket (deposits and withdrawals)
    async fn flow_transfers(&self) -> Result<Vec<Transfer>>;

    /// Upsert every bucket in one transaction; all or nothing
    async fn upsert_flow_metrics(&self, buckets: &BTreeMap<FlowKey, FlowTotals>) -> Result<UpsertCounts>;

    /// Rows of `window` with `time_bucket >= since`
    async fn flow_metrics_since(&self, window: Window, since: DateTime<Utc>) -> Result<Vec<FlowMetric>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Whether an alert for the group already covers `[from, to)`
    async fn alert_exists(
        &self,
        exchange_id: Option<Uuid>,
        asset_symbol: &str,
        window: Window,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool>;

    /// Insert every alert in one transaction; all or nothing
    async fn insert_alerts(&self, alerts: &[Alert]) -> Result<()>;
}
