pub mod adapters;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingestion;
pub mod persistence;
pub mod services;

pub use config::AppConfig;
pub use error::{AdapterError, FlowError, Result};
pub use ingestion::{SyncEngine, SyncOutcome};
pub use persistence::MemoryStore;
pub use services::{AggregateSummary, AnomalyDetector, CheckSummary, MetricsAggregator};
