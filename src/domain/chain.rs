use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FlowError, Result};

/// A ledger network we ingest from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "EVM")]
    Evm,
    #[serde(rename = "BTC")]
    Btc,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Evm, Chain::Btc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Evm => "EVM",
            Chain::Btc => "BTC",
        }
    }

    /// Canonical form used for catalogue lookups.
    ///
    /// EVM addresses are case-insensitive hex and get lowercased; Bitcoin
    /// addresses (base58 / bech32) are kept verbatim.
    pub fn normalize_address(&self, address: &str) -> String {
        let trimmed = address.trim();
        match self {
            Chain::Evm => trimmed.to_ascii_lowercase(),
            Chain::Btc => trimmed.to_string(),
        }
    }

    /// Key for the per-chain Postgres advisory lock
    pub fn lock_key(&self) -> i64 {
        match self {
            Chain::Evm => 0x6578_666c_0001,
            Chain::Btc => 0x6578_666c_0002,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Chain {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "evm" | "eth" | "ethereum" => Ok(Chain::Evm),
            "btc" | "bitcoin" => Ok(Chain::Btc),
            _ => Err("invalid chain; expected evm|btc"),
        }
    }
}

pub fn parse_chain(raw: &str) -> Result<Chain> {
    Chain::from_str(raw).map_err(|e| FlowError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chain_accepts_aliases() {
        assert_eq!(parse_chain("EVM").unwrap(), Chain::Evm);
        assert_eq!(parse_chain("eth").unwrap(), Chain::Evm);
        assert_eq!(parse_chain(" bitcoin ").unwrap(), Chain::Btc);
        assert!(parse_chain("solana").is_err());
    }

    #[test]
    fn evm_addresses_are_lowercased_btc_verbatim() {
        assert_eq!(
            Chain::Evm.normalize_address("0xABCdef0000000000000000000000000000000001"),
            "0xabcdef0000000000000000000000000000000001"
        );
        assert_eq!(
            Chain::Btc.normalize_address("bc1QExample"),
            "bc1QExample"
        );
    }

    #[test]
    fn lock_keys_differ_per_chain() {
        assert_ne!(Chain::Evm.lock_key(), Chain::Btc.lock_key());
    }
}
