//! Command implementations behind the CLI.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use super::output::{print_item, print_items, AggregateRow, CheckRow, OutputMode, SyncStateRow};
use crate::adapters::{BitcoinBackend, EvmRpcClient, PostgresStore};
use crate::classifier::EvmAssetParams;
use crate::config::AppConfig;
use crate::domain::{Chain, Window};
use crate::ingestion::{BtcSource, ChainSource, EvmSource, SyncEngine, SyncOutcome};
use crate::persistence::SyncStore;
use crate::services::{AnomalyDetector, MetricsAggregator};

pub async fn connect(config: &AppConfig) -> Result<Arc<PostgresStore>> {
    let store = PostgresStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(Arc::new(store))
}

pub async fn migrate(store: &PostgresStore) -> Result<()> {
    store.migrate().await?;
    println!("migrations applied");
    Ok(())
}

async fn sync_locked<S: ChainSource>(
    engine: SyncEngine<S, PostgresStore>,
    store: &PostgresStore,
) -> Result<SyncOutcome> {
    let chain = engine.chain();
    let Some(lock) = store.try_lock_chain(chain).await? else {
        bail!("{} sync is already running in another process", chain);
    };
    let outcome = engine.sync().await;
    lock.release().await?;
    Ok(outcome)
}

/// One bounded sync pass; fails the process if the pass reported an error
pub async fn sync(config: &AppConfig, store: Arc<PostgresStore>, chain: Chain) -> Result<()> {
    let outcome = match chain {
        Chain::Evm => {
            let client = EvmRpcClient::new(&config.evm.rpc_url, config.http.timeout_secs)?;
            let source = EvmSource::new(
                client,
                EvmAssetParams::from(&config.evm),
                config.evm.batch_size,
            );
            sync_locked(SyncEngine::new(source, Arc::clone(&store)), &store).await?
        }
        Chain::Btc => {
            let backend = BitcoinBackend::from_config(&config.btc, &config.http)?;
            let source = BtcSource::new(backend, config.btc.batch_size);
            sync_locked(SyncEngine::new(source, Arc::clone(&store)), &store).await?
        }
    };

    print_item(&outcome)?;
    if let Some(err) = &outcome.error {
        bail!("{} sync stopped: {}", chain, err);
    }
    Ok(())
}

pub async fn aggregate(store: Arc<PostgresStore>, windows: &[Window]) -> Result<()> {
    let aggregator = MetricsAggregator::new(store);
    let mut rows = Vec::with_capacity(windows.len());
    for window in windows {
        let summary = aggregator
            .aggregate(*window)
            .await
            .with_context(|| format!("aggregation for {} failed", window))?;
        rows.push(AggregateRow::from(&summary));
    }
    print_items(&rows, OutputMode::Table)
}

pub async fn alerts(
    config: &AppConfig,
    store: Arc<PostgresStore>,
    windows: &[Window],
    baseline_days: Option<i64>,
) -> Result<()> {
    let baseline_days = baseline_days.unwrap_or(config.anomaly.baseline_days);
    if baseline_days <= 0 {
        bail!("--baseline-days must be positive");
    }

    let detector = AnomalyDetector::new(store, config.anomaly.z_threshold);
    let mut rows = Vec::with_capacity(windows.len());
    for window in windows {
        let summary = detector
            .check(*window, baseline_days)
            .await
            .with_context(|| format!("anomaly check for {} failed", window))?;
        rows.push(CheckRow::from(&summary));
    }
    print_items(&rows, OutputMode::Table)
}

pub async fn status(store: &PostgresStore, json: bool) -> Result<()> {
    let states = store.list_sync_states().await?;
    info!("{} chains have sync state", states.len());
    let rows: Vec<SyncStateRow> = states.iter().map(SyncStateRow::from).collect();
    print_items(&rows, OutputMode::from_json_flag(json))
}
