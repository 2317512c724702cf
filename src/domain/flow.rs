use chrono::{DateTime, Duration, DurationRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// Aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
}

impl Window {
    pub const ALL: [Window; 2] = [Window::Hour, Window::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Hour => "1h",
            Window::Day => "1d",
        }
    }

    /// Length of one bucket
    pub fn duration(&self) -> Duration {
        match self {
            Window::Hour => Duration::hours(1),
            Window::Day => Duration::days(1),
        }
    }

    /// Truncate a timestamp to the start of its UTC bucket
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.duration()).unwrap_or(ts)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Window {
    type Err = FlowError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1h" | "hour" => Ok(Window::Hour),
            "1d" | "day" => Ok(Window::Day),
            other => Err(FlowError::Validation(format!(
                "unsupported window '{}'; expected 1h|1d",
                other
            ))),
        }
    }
}

/// Upsert key of a flow bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub time_bucket: DateTime<Utc>,
    pub window: Window,
    pub exchange_id: Option<Uuid>,
    pub asset_symbol: String,
}

/// Sums for one bucket, before persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowTotals {
    pub inflow: Decimal,
    pub outflow: Decimal,
}

impl FlowTotals {
    pub fn netflow(&self) -> Decimal {
        self.inflow - self.outflow
    }
}

/// Persisted bucket row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMetric {
    pub time_bucket: DateTime<Utc>,
    pub window: Window,
    pub exchange_id: Option<Uuid>,
    pub asset_symbol: String,
    pub inflow: Decimal,
    pub outflow: Decimal,
    pub netflow: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowMetric {
    pub fn key(&self) -> FlowKey {
        FlowKey {
            time_bucket: self.time_bucket,
            window: self.window,
            exchange_id: self.exchange_id,
            asset_symbol: self.asset_symbol.clone(),
        }
    }
}

/// Anomalous netflow event. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub exchange_id: Option<Uuid>,
    pub asset_symbol: String,
    pub window: Window,
    /// Bucket that triggered the alert
    pub time_bucket: DateTime<Utc>,
    pub z_score: Decimal,
    pub netflow: Decimal,
    pub baseline_mean: Decimal,
    pub baseline_std: Decimal,
    pub created_at: DateTime<Utc>,
}
