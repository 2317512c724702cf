//! Per-chain sync engine.
//!
//! One call to [`SyncEngine::sync`] processes at most one bounded batch of
//! units (blocks) above the persisted cursor. Each unit's transfers and the
//! advanced cursor are committed together, so a failure part-way through a
//! batch leaves the cursor on the last fully committed unit.

use async_trait::async_trait;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::{AddressCatalogue, Chain, SyncPhase, Transfer};
use crate::error::Result;
use crate::persistence::{CatalogueProvider, SyncStore};

/// Chain-specific half of a sync: where the tip is and what a unit contains
#[async_trait]
pub trait ChainSource: Send + Sync {
    fn chain(&self) -> Chain;

    /// Units per call; also the cold-start look-back
    fn batch_size(&self) -> u64;

    async fn latest_height(&self) -> Result<u64>;

    /// Fetch everything one unit needs and classify it.
    ///
    /// Any fetch failure fails the whole unit.
    async fn transfers_in_unit(&self, height: u64, catalogue: &AddressCatalogue) -> Result<Vec<Transfer>>;
}

/// Result of one sync call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub chain: Chain,
    pub units_processed: u64,
    pub transfers_emitted: u64,
    /// Cursor after the call
    pub cursor: Option<u64>,
    pub latest_height: Option<u64>,
    pub error: Option<String>,
}

impl SyncOutcome {
    fn new(chain: Chain) -> Self {
        Self {
            chain,
            units_processed: 0,
            transfers_emitted: 0,
            cursor: None,
            latest_height: None,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Units to process this call, or `None` when caught up.
///
/// Without a cursor the batch starts `batch` units below the tip.
pub fn plan_batch(cursor: Option<u64>, latest: u64, batch: u64) -> Option<RangeInclusive<u64>> {
    let batch = batch.max(1);
    let start = match cursor {
        Some(c) => c.checked_add(1)?,
        None => latest.saturating_sub(batch),
    };
    if start > latest {
        return None;
    }
    let end = start.saturating_add(batch - 1).min(latest);
    Some(start..=end)
}

pub struct SyncEngine<S, T> {
    source: S,
    store: Arc<T>,
}

impl<S, T> SyncEngine<S, T>
where
    S: ChainSource,
    T: SyncStore + CatalogueProvider,
{
    pub fn new(source: S, store: Arc<T>) -> Self {
        Self { source, store }
    }

    pub fn chain(&self) -> Chain {
        self.source.chain()
    }

    fn enter(&self, phase: &mut SyncPhase, next: SyncPhase) {
        if !phase.can_transition_to(next) {
            warn!("{} sync: unexpected transition {} -> {}", self.chain(), phase, next);
        }
        *phase = next;
    }

    /// Run one bounded pass. Never fails; errors are carried in the outcome.
    pub async fn sync(&self) -> SyncOutcome {
        let chain = self.chain();
        let mut outcome = SyncOutcome::new(chain);

        let state = match self.store.init_sync_state(chain).await {
            Ok(state) => state,
            Err(e) => {
                error!("{} sync: failed to load sync state: {}", chain, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.cursor = state.cursor;
        let mut phase = SyncPhase::from_cursor(state.cursor);

        let catalogue = match self.store.active_addresses(chain).await {
            Ok(rows) => AddressCatalogue::from_addresses(chain, &rows),
            Err(e) => {
                error!("{} sync: failed to load address catalogue: {}", chain, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        if catalogue.is_empty() {
            info!("{} sync: no active labeled addresses; nothing to do", chain);
            return outcome;
        }

        let latest = match self.source.latest_height().await {
            Ok(height) => height,
            Err(e) => {
                error!("{} sync: failed to read chain tip: {}", chain, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.latest_height = Some(latest);

        let Some(units) = plan_batch(state.cursor, latest, self.source.batch_size()) else {
            self.enter(&mut phase, SyncPhase::CaughtUp);
            info!(
                "{} sync: caught up (cursor {:?}, latest {})",
                chain, state.cursor, latest
            );
            return outcome;
        };

        info!(
            "{} sync: processing {}..={} (cursor {:?}, latest {}, {} addresses)",
            chain,
            units.start(),
            units.end(),
            state.cursor,
            latest,
            catalogue.len()
        );

        for unit in units {
            self.enter(&mut phase, SyncPhase::Processing(unit));

            match self.process_unit(unit, &catalogue).await {
                Ok(emitted) => {
                    outcome.units_processed += 1;
                    outcome.transfers_emitted += emitted;
                    outcome.cursor = Some(unit);
                }
                Err(e) => {
                    self.enter(&mut phase, SyncPhase::Failed(unit));
                    error!("{} sync: unit {} failed: {}", chain, unit, e);
                    outcome.error = Some(format!("unit {}: {}", unit, e));
                    break;
                }
            }
        }

        if !phase.is_failed() {
            self.enter(&mut phase, SyncPhase::CaughtUp);
        }
        info!(
            "{} sync: {} units, {} transfers, cursor {:?} [{}]",
            chain, outcome.units_processed, outcome.transfers_emitted, outcome.cursor, phase
        );
        outcome
    }

    async fn process_unit(&self, unit: u64, catalogue: &AddressCatalogue) -> Result<u64> {
        let chain = self.chain();
        let transfers = self.source.transfers_in_unit(unit, catalogue).await?;
        let inserted = self.store.commit_unit(chain, unit, &transfers).await?;
        debug!(
            "{} unit {}: {} transfers classified, {} new",
            chain,
            unit,
            transfers.len(),
            inserted
        );
        Ok(transfers.len() as u64)
    }
}
