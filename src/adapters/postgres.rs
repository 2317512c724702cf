use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AddressLabel, Alert, Chain, FlowKey, FlowMetric, FlowTotals, LabeledAddress,
    SyncState, Transfer, Window,
};
use crate::error::{FlowError, Result};
use crate::persistence::{AlertStore, CatalogueProvider, MetricStore, SyncStore, UpsertCounts};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Try to take the cross-process sync lock for `chain`.
    ///
    /// Returns `None` when another session holds it. The lock lives on a
    /// dedicated pooled connection until [`ChainLock::release`].
    #[instrument(skip(self))]
    pub async fn try_lock_chain(&self, chain: Chain) -> Result<Option<ChainLock>> {
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(chain.lock_key())
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            debug!("advisory lock for {} is held elsewhere", chain);
            return Ok(None);
        }
        Ok(Some(ChainLock {
            chain,
            conn: Some(conn),
        }))
    }
}

/// Session-level advisory lock guarding one chain's sync
pub struct ChainLock {
    chain: Chain,
    conn: Option<PoolConnection<Postgres>>,
}

impl ChainLock {
    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.chain.lock_key())
                .execute(&mut *conn)
                .await;
            if let Err(e) = unlocked {
                // The session may still hold the lock; never pool it again
                warn!("{} advisory unlock failed: {}; closing its session", self.chain, e);
                drop(conn.detach());
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Drop for ChainLock {
    fn drop(&mut self) {
        // Unreleased: close the session instead of returning it to the pool
        // with the lock still held.
        if let Some(conn) = self.conn.take() {
            warn!("{} advisory lock dropped without release; closing its session", self.chain);
            drop(conn.detach());
        }
    }
}

fn persistence_err(what: &str, err: impl std::fmt::Display) -> FlowError {
    FlowError::Persistence(format!("{}: {}", what, err))
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|e| persistence_err(what, e))
}

fn sync_state_from_row(row: &PgRow) -> Result<SyncState> {
    let chain: String = row.get("chain");
    let cursor: Option<i64> = row.get("cursor");
    Ok(SyncState {
        chain: chain.parse().map_err(|e| persistence_err("sync_state.chain", e))?,
        cursor: cursor
            .map(u64::try_from)
            .transpose()
            .map_err(|e| persistence_err("sync_state.cursor", e))?,
        updated_at: row.get("updated_at"),
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer> {
    let chain: String = row.get("chain");
    let direction: String = row.get("direction");
    let block_number: i64 = row.get("block_number");
    let log_index: Option<i32> = row.get("log_index");

    Ok(Transfer {
        timestamp: row.get("timestamp"),
        chain: chain.parse().map_err(|e| persistence_err("raw_transfers.chain", e))?,
        tx_hash: row.get("tx_hash"),
        block_number: u64::try_from(block_number)
            .map_err(|e| persistence_err("raw_transfers.block_number", e))?,
        log_index: log_index
            .map(u32::try_from)
            .transpose()
            .map_err(|e| persistence_err("raw_transfers.log_index", e))?,
        from_address: row.get("from_address"),
        to_address: row.get("to_address"),
        asset_symbol: row.get("asset_symbol"),
        asset_address: row.get("asset_address"),
        amount: row.get("amount"),
        direction: direction
            .parse()
            .map_err(|e| persistence_err("raw_transfers.direction", e))?,
        exchange_from_id: row.get("exchange_from_id"),
        exchange_to_id: row.get("exchange_to_id"),
    })
}

fn metric_from_row(row: &PgRow) -> Result<FlowMetric> {
    let window: String = row.get("window_size");
    Ok(FlowMetric {
        time_bucket: row.get("time_bucket"),
        window: window.parse()?,
        exchange_id: row.get("exchange_id"),
        asset_symbol: row.get("asset_symbol"),
        inflow: row.get("inflow"),
        outflow: row.get("outflow"),
        netflow: row.get("netflow"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl CatalogueProvider for PostgresStore {
    #[instrument(skip(self))]
    async fn active_addresses(&self, chain: Chain) -> Result<Vec<LabeledAddress>> {
        let rows = sqlx::query(
            r#"
            SELECT exchange_id, chain, address, label, cluster_id, is_active
            FROM labeled_addresses
            WHERE chain = $1 AND is_active
            ORDER BY created_at, id
            "#,
        )
        .bind(chain.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut addresses = Vec::with_capacity(rows.len());
        for row in rows {
            let label: String = row.get("label");
            let label = match label.parse::<AddressLabel>() {
                Ok(label) => label,
                Err(e) => {
                    warn!("skipping catalogue row: {}", e);
                    continue;
                }
            };
            addresses.push(LabeledAddress {
                exchange_id: row.get("exchange_id"),
                chain,
                address: row.get("address"),
                label,
                cluster_id: row.get("cluster_id"),
                is_active: row.get("is_active"),
            });
        }
        Ok(addresses)
    }
}

#[async_trait]
impl SyncStore for PostgresStore {
    async fn load_sync_state(&self, chain: Chain) -> Result<Option<SyncState>> {
        let row = sqlx::query("SELECT chain, cursor, updated_at FROM sync_state WHERE chain = $1")
            .bind(chain.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(sync_state_from_row).transpose()
    }

    async fn init_sync_state(&self, chain: Chain) -> Result<SyncState> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (chain, cursor, updated_at)
            VALUES ($1, NULL, NOW())
            ON CONFLICT (chain) DO NOTHING
            "#,
        )
        .bind(chain.as_str())
        .execute(&self.pool)
        .await?;

        self.load_sync_state(chain)
            .await?
            .ok_or_else(|| FlowError::Persistence(format!("sync_state row for {} vanished", chain)))
    }

    #[instrument(skip(self, transfers), fields(count = transfers.len()))]
    async fn commit_unit(&self, chain: Chain, unit: u64, transfers: &[Transfer]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for t in transfers {
            let result = sqlx::query(
                r#"
                INSERT INTO raw_transfers (
                    timestamp, chain, tx_hash, block_number, log_index,
                    from_address, to_address, asset_symbol, asset_address, amount,
                    direction, exchange_from_id, exchange_to_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (chain, tx_hash, (COALESCE(log_index, -1))) DO NOTHING
                "#,
            )
            .bind(t.timestamp)
            .bind(t.chain.as_str())
            .bind(&t.tx_hash)
            .bind(to_i64(t.block_number, "block_number")?)
            .bind(t.log_index.map(|i| i as i32))
            .bind(&t.from_address)
            .bind(&t.to_address)
            .bind(&t.asset_symbol)
            .bind(&t.asset_address)
            .bind(t.amount)
            .bind(t.direction.as_str())
            .bind(t.exchange_from_id)
            .bind(t.exchange_to_id)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        let advanced = sqlx::query(
            r#"
            INSERT INTO sync_state (chain, cursor, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                updated_at = NOW()
            WHERE sync_state.cursor IS NULL OR sync_state.cursor < EXCLUDED.cursor
            "#,
        )
        .bind(chain.as_str())
        .bind(to_i64(unit, "cursor")?)
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            // Dropping the transaction rolls back the transfer inserts
            return Err(FlowError::Persistence(format!(
                "{} cursor did not advance to {}",
                chain, unit
            )));
        }

        tx.commit().await?;
        debug!("{} unit {} committed ({} new transfers)", chain, unit, inserted);
        Ok(inserted)
    }

    async fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let rows = sqlx::query("SELECT chain, cursor, updated_at FROM sync_state ORDER BY chain")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(sync_state_from_row).collect()
    }
}

#[async_trait]
impl MetricStore for PostgresStore {
    #[instrument(skip(self))]
    async fn flow_transfers(&self) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, chain, tx_hash, block_number, log_index,
                   from_address, to_address, asset_symbol, asset_address, amount,
                   direction, exchange_from_id, exchange_to_id
            FROM raw_transfers
            WHERE direction IN ('deposit', 'withdraw')
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transfer_from_row).collect()
    }

    #[instrument(skip(self, buckets), fields(buckets = buckets.len()))]
    async fn upsert_flow_metrics(&self, buckets: &BTreeMap<FlowKey, FlowTotals>) -> Result<UpsertCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = UpsertCounts::default();

        for (key, totals) in buckets {
            let row = sqlx::query(
                r#"
                INSERT INTO flow_metrics (
                    time_bucket, window_size, exchange_id, asset_symbol,
                    inflow, outflow, netflow, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                ON CONFLICT (
                    time_bucket,
                    window_size,
                    (COALESCE(exchange_id, '00000000-0000-0000-0000-000000000000'::uuid)),
                    asset_symbol
                ) DO UPDATE SET
                    inflow = EXCLUDED.inflow,
                    outflow = EXCLUDED.outflow,
                    netflow = EXCLUDED.netflow,
                    updated_at = NOW()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(key.time_bucket)
            .bind(key.window.as_str())
            .bind(key.exchange_id)
            .bind(&key.asset_symbol)
            .bind(totals.inflow)
            .bind(totals.outflow)
            .bind(totals.netflow())
            .fetch_one(&mut *tx)
            .await?;

            if row.get::<bool, _>("inserted") {
                counts.created += 1;
            } else {
                counts.updated += 1;
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    async fn flow_metrics_since(&self, window: Window, since: DateTime<Utc>) -> Result<Vec<FlowMetric>> {
        let rows = sqlx::query(
            r#"
            SELECT time_bucket, window_size, exchange_id, asset_symbol,
                   inflow, outflow, netflow, created_at, updated_at
            FROM flow_metrics
            WHERE window_size = $1 AND time_bucket >= $2
            ORDER BY time_bucket
            "#,
        )
        .bind(window.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(metric_from_row).collect()
    }
}

#[async_trait]
impl AlertStore for PostgresStore {
    async fn alert_exists(
        &self,
        exchange_id: Option<Uuid>,
        asset_symbol: &str,
        window: Window,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM alerts
                WHERE exchange_id IS NOT DISTINCT FROM $1
                  AND asset_symbol = $2
                  AND window_size = $3
                  AND time_bucket >= $4
                  AND time_bucket < $5
            )
            "#,
        )
        .bind(exchange_id)
        .bind(asset_symbol)
        .bind(window.as_str())
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self, alerts), fields(count = alerts.len()))]
    async fn insert_alerts(&self, alerts: &[Alert]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for alert in alerts {
            sqlx::query(
                r#"
                INSERT INTO alerts (
                    exchange_id, asset_symbol, window_size, time_bucket,
                    z_score, netflow, baseline_mean, baseline_std, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(alert.exchange_id)
            .bind(&alert.asset_symbol)
            .bind(alert.window.as_str())
            .bind(alert.time_bucket)
            .bind(alert.z_score)
            .bind(alert.netflow)
            .bind(alert.baseline_mean)
            .bind(alert.baseline_std)
            .bind(alert.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
