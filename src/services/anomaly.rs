//! Z-score anomaly detection over flow metric netflows.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Alert, FlowMetric, Window};
use crate::error::{FlowError, Result};
use crate::persistence::{AlertStore, MetricStore};

/// Result of one check call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub window: Window,
    pub groups_checked: u64,
    pub alerts_created: u64,
}

/// Mean and population standard deviation of a baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: Decimal,
    pub std: f64,
}

impl Baseline {
    /// `None` for an empty series. A constant series gets `std = 1`.
    pub fn from_values(values: &[Decimal]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = Decimal::from(values.len() as u64);
        let sum = values
            .iter()
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))?;
        let mean = sum.checked_div(n)?;

        let deviations: Vec<f64> = values
            .iter()
            .map(|v| (*v - mean).to_f64().unwrap_or(0.0))
            .collect();
        let std = if values.iter().all(|v| *v == mean) {
            1.0
        } else {
            let variance =
                deviations.iter().map(|d| d * d).sum::<f64>() / deviations.len() as f64;
            let std = variance.sqrt();
            if std > 0.0 {
                std
            } else {
                1.0
            }
        };
        Some(Self { mean, std })
    }

    pub fn z_score(&self, value: Decimal) -> f64 {
        (value - self.mean).to_f64().unwrap_or(0.0) / self.std
    }
}

type GroupKey = (Option<Uuid>, String);

/// Group rows by (exchange, asset), each group sorted by bucket
fn group_metrics(metrics: Vec<FlowMetric>) -> BTreeMap<GroupKey, Vec<FlowMetric>> {
    let mut groups: BTreeMap<GroupKey, Vec<FlowMetric>> = BTreeMap::new();
    for metric in metrics {
        groups
            .entry((metric.exchange_id, metric.asset_symbol.clone()))
            .or_default()
            .push(metric);
    }
    for rows in groups.values_mut() {
        rows.sort_by_key(|m| m.time_bucket);
    }
    groups
}

fn to_decimal(value: f64, what: &str) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(8))
        .ok_or_else(|| FlowError::Validation(format!("{} {} is not representable", what, value)))
}

/// Z-score as stored on an alert, saturated to the decimal range
fn z_to_decimal(z: f64) -> Decimal {
    match Decimal::from_f64(z) {
        Some(d) => d.round_dp(8),
        None if z.is_sign_negative() => Decimal::MIN,
        None => Decimal::MAX,
    }
}

/// Start of the baseline period, `None` when it falls outside the calendar
fn baseline_start(now: DateTime<Utc>, baseline_days: i64) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(Duration::try_days(baseline_days)?)
}

pub struct AnomalyDetector<S> {
    store: Arc<S>,
    z_threshold: f64,
}

impl<S: MetricStore + AlertStore> AnomalyDetector<S> {
    pub fn new(store: Arc<S>, z_threshold: f64) -> Self {
        Self { store, z_threshold }
    }

    pub async fn check(&self, window: Window, baseline_days: i64) -> Result<CheckSummary> {
        self.check_at(window, baseline_days, Utc::now()).await
    }

    /// Check the latest bucket of every (exchange, asset) group against the
    /// buckets before it within the last `baseline_days`.
    #[instrument(skip(self))]
    pub async fn check_at(
        &self,
        window: Window,
        baseline_days: i64,
        now: DateTime<Utc>,
    ) -> Result<CheckSummary> {
        if baseline_days <= 0 {
            return Err(FlowError::Validation(format!(
                "baseline_days must be positive, got {}",
                baseline_days
            )));
        }
        let since = baseline_start(now, baseline_days).ok_or_else(|| {
            FlowError::Validation(format!("baseline of {} days is out of range", baseline_days))
        })?;
        let metrics = self.store.flow_metrics_since(window, since).await?;
        let groups = group_metrics(metrics);

        let mut summary = CheckSummary {
            window,
            groups_checked: groups.len() as u64,
            alerts_created: 0,
        };

        let mut alerts = Vec::new();
        for ((exchange_id, asset), rows) in &groups {
            let Some((candidate, history)) = rows.split_last() else {
                continue;
            };
            if history.len() < 2 {
                debug!(
                    "{:?}/{} {}: {} baseline buckets, need 2",
                    exchange_id,
                    asset,
                    window,
                    history.len()
                );
                continue;
            }

            let netflows: Vec<Decimal> = history.iter().map(|m| m.netflow).collect();
            let Some(baseline) = Baseline::from_values(&netflows) else {
                warn!("{:?}/{} {}: baseline overflow; skipped", exchange_id, asset, window);
                continue;
            };
            let z = baseline.z_score(candidate.netflow);
            if z.abs() < self.z_threshold {
                continue;
            }

            let bucket_end = candidate.time_bucket + window.duration();
            if self
                .store
                .alert_exists(*exchange_id, asset, window, candidate.time_bucket, bucket_end)
                .await?
            {
                debug!(
                    "{:?}/{} {} bucket {} already alerted",
                    exchange_id, asset, window, candidate.time_bucket
                );
                continue;
            }

            let z_score = z_to_decimal(z);
            if z_score == Decimal::MAX || z_score == Decimal::MIN {
                warn!(
                    "{:?}/{} {}: z-score {:e} saturated to {}",
                    exchange_id, asset, window, z, z_score
                );
            }
            let baseline_std = match to_decimal(baseline.std, "baseline std") {
                Ok(std) => std,
                Err(e) => {
                    warn!("{:?}/{} {}: {}; skipped", exchange_id, asset, window, e);
                    continue;
                }
            };

            warn!(
                "flow anomaly: {:?}/{} {} bucket {} netflow {} z={:.2}",
                exchange_id, asset, window, candidate.time_bucket, candidate.netflow, z
            );
            alerts.push(Alert {
                exchange_id: *exchange_id,
                asset_symbol: asset.clone(),
                window,
                time_bucket: candidate.time_bucket,
                z_score,
                netflow: candidate.netflow,
                baseline_mean: baseline.mean,
                baseline_std,
                created_at: now,
            });
        }

        if !alerts.is_empty() {
            self.store.insert_alerts(&alerts).await?;
        }
        summary.alerts_created = alerts.len() as u64;

        info!(
            "alerts {}: {} groups checked, {} alerts created",
            window, summary.groups_checked, summary.alerts_created
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn population_std_of_baseline() {
        let b = Baseline::from_values(&[dec!(10), dec!(12), dec!(9), dec!(11)]).unwrap();
        assert_eq!(b.mean, dec!(10.5));
        assert!((b.std - 1.25f64.sqrt()).abs() < 1e-12);
        assert!(b.z_score(dec!(50)) > 3.0);
        assert!(b.z_score(dec!(11)).abs() < 3.0);
    }

    #[test]
    fn constant_baseline_uses_unit_std() {
        let b = Baseline::from_values(&[dec!(0.1), dec!(0.1), dec!(0.1)]).unwrap();
        assert_eq!(b.std, 1.0);
        assert!((b.z_score(dec!(3.1)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_baseline_has_no_stats() {
        assert!(Baseline::from_values(&[]).is_none());
    }

    #[test]
    fn oversized_z_saturates_instead_of_failing() {
        assert_eq!(z_to_decimal(2.1e29), Decimal::MAX);
        assert_eq!(z_to_decimal(-2.1e29), Decimal::MIN);
        assert_eq!(z_to_decimal(3.5), dec!(3.5));
    }

    #[test]
    fn baseline_start_rejects_out_of_range_periods() {
        let now = Utc::now();
        assert_eq!(baseline_start(now, 1), Some(now - Duration::days(1)));
        assert!(baseline_start(now, 100_000_000).is_none());
        assert!(baseline_start(now, i64::MAX).is_none());
    }
}
