use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Chain;

/// Which way value moved relative to the labeled exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Deposit,
    Withdraw,
    Internal,
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "deposit",
            Direction::Withdraw => "withdraw",
            Direction::Internal => "internal",
            Direction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(Direction::Deposit),
            "withdraw" => Ok(Direction::Withdraw),
            "internal" => Ok(Direction::Internal),
            "unknown" => Ok(Direction::Unknown),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// A normalized value movement, as appended to the raw transfer ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub timestamp: DateTime<Utc>,
    pub chain: Chain,
    pub tx_hash: String,
    pub block_number: u64,
    /// Receipt log position for token transfers, `None` for native moves
    pub log_index: Option<u32>,
    pub from_address: String,
    pub to_address: String,
    pub asset_symbol: String,
    pub asset_address: Option<String>,
    pub amount: Decimal,
    pub direction: Direction,
    pub exchange_from_id: Option<Uuid>,
    pub exchange_to_id: Option<Uuid>,
}

impl Transfer {
    /// Ledger dedup key
    pub fn natural_key(&self) -> (Chain, &str, Option<u32>) {
        (self.chain, self.tx_hash.as_str(), self.log_index)
    }

    /// Exchange a flow bucket is attributed to: destination for deposits,
    /// source for withdrawals. Internal and unknown moves belong to no bucket.
    pub fn flow_exchange(&self) -> Option<Option<Uuid>> {
        match self.direction {
            Direction::Deposit => Some(self.exchange_to_id.or(self.exchange_from_id)),
            Direction::Withdraw => Some(self.exchange_from_id.or(self.exchange_to_id)),
            Direction::Internal | Direction::Unknown => None,
        }
    }
}
