pub mod aggregator;
pub mod anomaly;
pub mod runner;

pub use aggregator::{fold_transfers, AggregateSummary, MetricsAggregator};
pub use anomaly::{AnomalyDetector, Baseline, CheckSummary};
pub use runner::{guarded_sync, ChainGuard, ChainPermit};
