//! Output formatting for CLI commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::SyncState;
use crate::services::{AggregateSummary, CheckSummary};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Print a single Serialize item as pretty JSON.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct SyncStateRow {
    pub chain: String,
    pub cursor: String,
    pub updated_at: String,
}

impl From<&SyncState> for SyncStateRow {
    fn from(state: &SyncState) -> Self {
        Self {
            chain: state.chain.to_string(),
            cursor: state
                .cursor
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            updated_at: state.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct AggregateRow {
    pub window: String,
    pub transfers: u64,
    pub created: u64,
    pub updated: u64,
    pub total: u64,
}

impl From<&AggregateSummary> for AggregateRow {
    fn from(summary: &AggregateSummary) -> Self {
        Self {
            window: summary.window.to_string(),
            transfers: summary.transfers_read,
            created: summary.created,
            updated: summary.updated,
            total: summary.total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct CheckRow {
    pub window: String,
    pub groups_checked: u64,
    pub alerts_created: u64,
}

impl From<&CheckSummary> for CheckRow {
    fn from(summary: &CheckSummary) -> Self {
        Self {
            window: summary.window.to_string(),
            groups_checked: summary.groups_checked,
            alerts_created: summary.alerts_created,
        }
    }
}
