//! exflow CLI
//!
//! Commands:
//! - `exflow migrate` - Apply database migrations
//! - `exflow sync <evm|btc>` - Run one bounded sync pass for a chain
//! - `exflow aggregate` - Rebuild flow metrics from the ledger
//! - `exflow alerts` - Check the latest buckets for anomalies
//! - `exflow run` - Periodic runner
//! - `exflow status` - Show sync cursors

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::domain::{Chain, Window};

/// Exchange flow intelligence
#[derive(Parser, Debug)]
#[command(name = "exflow")]
#[command(author, version, about = "On-chain exchange flow ingestion, metrics and alerts")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config", env = "EXFLOW_CONFIG_DIR")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply database migrations
    Migrate,

    /// Sync one chain: process at most one batch above the cursor
    Sync {
        #[arg(value_enum)]
        chain: ChainArg,
    },

    /// Fold the transfer ledger into flow metrics
    Aggregate {
        #[arg(long, value_enum, default_value = "all")]
        window: WindowArg,
    },

    /// Raise alerts for anomalous netflow
    Alerts {
        #[arg(long, value_enum, default_value = "all")]
        window: WindowArg,

        /// Baseline length in days (defaults to anomaly.baseline_days)
        #[arg(long)]
        baseline_days: Option<i64>,
    },

    /// Run sync, aggregation and alert checks on their schedules
    Run,

    /// Show the sync cursor of each chain
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChainArg {
    Evm,
    Btc,
}

impl From<ChainArg> for Chain {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Evm => Chain::Evm,
            ChainArg::Btc => Chain::Btc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WindowArg {
    #[value(name = "1h")]
    Hour,
    #[value(name = "1d")]
    Day,
    All,
}

impl WindowArg {
    pub fn windows(&self) -> Vec<Window> {
        match self {
            WindowArg::Hour => vec![Window::Hour],
            WindowArg::Day => vec![Window::Day],
            WindowArg::All => Window::ALL.to_vec(),
        }
    }
}
