use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use super::Chain;

/// Operator-assigned role of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressLabel {
    Hot,
    Cold,
    Deposit,
    Reserve,
}

impl AddressLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressLabel::Hot => "hot",
            AddressLabel::Cold => "cold",
            AddressLabel::Deposit => "deposit",
            AddressLabel::Reserve => "reserve",
        }
    }
}

impl FromStr for AddressLabel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(AddressLabel::Hot),
            "cold" => Ok(AddressLabel::Cold),
            "deposit" => Ok(AddressLabel::Deposit),
            "reserve" => Ok(AddressLabel::Reserve),
            other => Err(format!("unknown address label: {}", other)),
        }
    }
}

/// A labeled wallet as stored by the catalogue owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledAddress {
    pub exchange_id: Uuid,
    pub chain: Chain,
    pub address: String,
    pub label: AddressLabel,
    pub cluster_id: Option<Uuid>,
    pub is_active: bool,
}

/// What a catalogue hit resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressOwner {
    pub exchange_id: Uuid,
    pub cluster_id: Option<Uuid>,
    pub label: AddressLabel,
}

/// Read-only snapshot of the active labeled addresses of one chain.
///
/// Loaded once at the start of a sync call and shared by every unit of that
/// call; edits made by the catalogue owner afterwards are not observed.
#[derive(Debug, Clone)]
pub struct AddressCatalogue {
    chain: Chain,
    entries: HashMap<String, AddressOwner>,
}

impl AddressCatalogue {
    pub fn empty(chain: Chain) -> Self {
        Self {
            chain,
            entries: HashMap::new(),
        }
    }

    /// Build a snapshot from catalogue rows. Inactive rows and rows of other
    /// chains are dropped; a second active row for an address already seen is
    /// ignored.
    pub fn from_addresses<'a, I>(chain: Chain, rows: I) -> Self
    where
        I: IntoIterator<Item = &'a LabeledAddress>,
    {
        let mut entries = HashMap::new();
        for row in rows {
            if row.chain != chain || !row.is_active {
                continue;
            }
            let key = chain.normalize_address(&row.address);
            if entries.contains_key(&key) {
                warn!(
                    "duplicate active {} address {} in catalogue; keeping first mapping",
                    chain, key
                );
                continue;
            }
            entries.insert(
                key,
                AddressOwner {
                    exchange_id: row.exchange_id,
                    cluster_id: row.cluster_id,
                    label: row.label,
                },
            );
        }
        Self { chain, entries }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an address in any casing the chain tolerates
    pub fn lookup(&self, address: &str) -> Option<&AddressOwner> {
        self.entries.get(&self.chain.normalize_address(address))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.lookup(address).is_some()
    }
}
