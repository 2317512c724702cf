//! Periodic runner for `exflow run`.
//!
//! One interval task per chain plus one each for aggregation and alert
//! checks. A chain whose previous sync is still running is skipped for that
//! tick. Shutdown lets in-flight work finish.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::adapters::{BitcoinBackend, EvmRpcClient, PostgresStore};
use crate::classifier::EvmAssetParams;
use crate::config::AppConfig;
use crate::domain::{Chain, Window};
use crate::error::Result;
use crate::ingestion::{BtcSource, ChainSource, EvmSource, SyncEngine, SyncOutcome};
use crate::services::{AnomalyDetector, MetricsAggregator};

/// In-process single-flight guard keyed by chain
#[derive(Clone, Default)]
pub struct ChainGuard {
    busy: Arc<DashMap<Chain, ()>>,
}

impl ChainGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `chain`; `None` while another claim is alive
    pub fn try_acquire(&self, chain: Chain) -> Option<ChainPermit> {
        match self.busy.entry(chain) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(ChainPermit {
                    chain,
                    busy: Arc::clone(&self.busy),
                })
            }
        }
    }

    pub fn is_busy(&self, chain: Chain) -> bool {
        self.busy.contains_key(&chain)
    }
}

/// Released on drop
pub struct ChainPermit {
    chain: Chain,
    busy: Arc<DashMap<Chain, ()>>,
}

impl Drop for ChainPermit {
    fn drop(&mut self) {
        self.busy.remove(&self.chain);
    }
}

/// Sync one chain under both the in-process guard and the cross-process
/// advisory lock. `None` when either is already held.
pub async fn guarded_sync<S>(
    engine: &SyncEngine<S, PostgresStore>,
    store: &PostgresStore,
    guard: &ChainGuard,
) -> Result<Option<SyncOutcome>>
where
    S: ChainSource,
{
    let chain = engine.chain();
    let Some(_permit) = guard.try_acquire(chain) else {
        warn!("{} sync still running; skipping this tick", chain);
        return Ok(None);
    };
    let Some(lock) = store.try_lock_chain(chain).await? else {
        warn!("{} sync is running in another process; skipping", chain);
        return Ok(None);
    };

    let outcome = engine.sync().await;
    lock.release().await?;
    Ok(Some(outcome))
}

fn spawn_sync_loop<S>(
    tasks: &mut JoinSet<()>,
    engine: SyncEngine<S, PostgresStore>,
    store: Arc<PostgresStore>,
    guard: ChainGuard,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ChainSource + 'static,
{
    let engine = Arc::new(engine);
    tasks.spawn(async move {
        let chain = engine.chain();
        let mut inflight = JoinSet::new();
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("{} sync every {:?}", chain, every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Reap finished passes so the set does not grow
                    while inflight.try_join_next().is_some() {}

                    if guard.is_busy(chain) {
                        warn!("{} sync still running; skipping this tick", chain);
                        continue;
                    }
                    let engine = Arc::clone(&engine);
                    let store = Arc::clone(&store);
                    let guard = guard.clone();
                    inflight.spawn(async move {
                        if let Err(e) = guarded_sync(&engine, &store, &guard).await {
                            error!("{} sync tick failed: {}", engine.chain(), e);
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        while inflight.join_next().await.is_some() {}
        info!("{} sync loop stopped", chain);
    });
}

fn spawn_aggregate_loop(
    tasks: &mut JoinSet<()>,
    store: Arc<PostgresStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tasks.spawn(async move {
        let aggregator = MetricsAggregator::new(store);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = aggregator.aggregate_all().await {
                        error!("aggregation failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

fn spawn_alert_loop(
    tasks: &mut JoinSet<()>,
    store: Arc<PostgresStore>,
    config: &AppConfig,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let baseline_days = config.anomaly.baseline_days;
    let detector = AnomalyDetector::new(store, config.anomaly.z_threshold);
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for window in Window::ALL {
                        if let Err(e) = detector.check(window, baseline_days).await {
                            error!("anomaly check {} failed: {}", window, e);
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// Run every periodic job until Ctrl-C
pub async fn run(config: &AppConfig, store: Arc<PostgresStore>) -> Result<()> {
    let guard = ChainGuard::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    let schedule = &config.schedule;

    let evm = EvmRpcClient::new(&config.evm.rpc_url, config.http.timeout_secs)?;
    let evm_engine = SyncEngine::new(
        EvmSource::new(evm, EvmAssetParams::from(&config.evm), config.evm.batch_size),
        Arc::clone(&store),
    );
    spawn_sync_loop(
        &mut tasks,
        evm_engine,
        Arc::clone(&store),
        guard.clone(),
        Duration::from_secs(schedule.evm_sync_secs),
        shutdown_rx.clone(),
    );

    if config.btc.enabled {
        let btc = BitcoinBackend::from_config(&config.btc, &config.http)?;
        let btc_engine = SyncEngine::new(
            BtcSource::new(btc, config.btc.batch_size),
            Arc::clone(&store),
        );
        spawn_sync_loop(
            &mut tasks,
            btc_engine,
            Arc::clone(&store),
            guard.clone(),
            Duration::from_secs(schedule.btc_sync_secs),
            shutdown_rx.clone(),
        );
    } else {
        info!("BTC ingestion disabled");
    }

    spawn_aggregate_loop(
        &mut tasks,
        Arc::clone(&store),
        Duration::from_secs(schedule.aggregate_secs),
        shutdown_rx.clone(),
    );
    spawn_alert_loop(
        &mut tasks,
        Arc::clone(&store),
        config,
        Duration::from_secs(schedule.alerts_secs),
        shutdown_rx,
    );

    info!("runner started; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; waiting for in-flight work");
    // Receivers only observe the change; a send error means every task is gone
    let _ = shutdown_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("runner task panicked: {}", e);
        }
    }
    info!("runner stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_busy_chain_is_refused() {
        let guard = ChainGuard::new();
        let permit = guard.try_acquire(Chain::Evm).expect("first claim");
        assert!(guard.try_acquire(Chain::Evm).is_none());
        assert!(guard.try_acquire(Chain::Btc).is_some());
        assert!(guard.is_busy(Chain::Evm));

        drop(permit);
        assert!(!guard.is_busy(Chain::Evm));
        assert!(guard.try_acquire(Chain::Evm).is_some());
    }

    #[test]
    fn clones_share_state() {
        let guard = ChainGuard::new();
        let other = guard.clone();
        let _permit = guard.try_acquire(Chain::Btc).expect("claim");
        assert!(other.try_acquire(Chain::Btc).is_none());
    }
}
