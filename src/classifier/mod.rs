//! Transfer classification.
//!
//! Pure functions from chain payloads plus an [`AddressCatalogue`] snapshot
//! to [`Transfer`] records. Nothing here touches storage or the network, and
//! nothing here fails: payloads that cannot be interpreted are skipped.

pub mod bitcoin;
pub mod evm;

use uuid::Uuid;

use crate::config::EvmConfig;
use crate::domain::{AddressCatalogue, AddressOwner, Direction};

/// Direction of a move between two (possibly catalogued) endpoints
pub fn classify_direction(from: Option<&AddressOwner>, to: Option<&AddressOwner>) -> Direction {
    match (from, to) {
        (Some(_), Some(_)) => Direction::Internal,
        (None, Some(_)) => Direction::Deposit,
        (Some(_), None) => Direction::Withdraw,
        (None, None) => Direction::Unknown,
    }
}

/// Direction plus the exchange ids recorded on the ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub direction: Direction,
    pub exchange_from_id: Option<Uuid>,
    pub exchange_to_id: Option<Uuid>,
}

impl Endpoints {
    /// Resolve both endpoints of an account-model move against the catalogue
    pub fn resolve(catalogue: &AddressCatalogue, from: &str, to: &str) -> Self {
        let from_owner = catalogue.lookup(from);
        let to_owner = catalogue.lookup(to);
        Self {
            direction: classify_direction(from_owner, to_owner),
            exchange_from_id: from_owner.map(|o| o.exchange_id),
            exchange_to_id: to_owner.map(|o| o.exchange_id),
        }
    }

    pub fn is_relevant(&self) -> bool {
        self.direction != Direction::Unknown
    }
}

/// Asset naming and scaling for EVM transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmAssetParams {
    pub native_symbol: String,
    pub native_decimals: u32,
    pub token_decimals: u32,
}

impl Default for EvmAssetParams {
    fn default() -> Self {
        Self {
            native_symbol: "ETH".to_string(),
            native_decimals: 18,
            token_decimals: 18,
        }
    }
}

impl From<&EvmConfig> for EvmAssetParams {
    fn from(cfg: &EvmConfig) -> Self {
        Self {
            native_symbol: cfg.native_symbol.clone(),
            native_decimals: cfg.native_decimals,
            token_decimals: cfg.token_decimals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AddressLabel, Chain, LabeledAddress};

    fn catalogue(entries: &[(&str, Uuid)]) -> AddressCatalogue {
        let rows: Vec<LabeledAddress> = entries
            .iter()
            .map(|(address, exchange_id)| LabeledAddress {
                exchange_id: *exchange_id,
                chain: Chain::Evm,
                address: address.to_string(),
                label: AddressLabel::Hot,
                cluster_id: None,
                is_active: true,
            })
            .collect();
        AddressCatalogue::from_addresses(Chain::Evm, &rows)
    }

    #[test]
    fn direction_follows_which_side_is_catalogued() {
        let a = Uuid::new_v4();
        let a_prime = Uuid::new_v4();
        let cat = catalogue(&[("0xa1", a), ("0xa2", a_prime)]);

        let deposit = Endpoints::resolve(&cat, "0xb0", "0xa1");
        assert_eq!(deposit.direction, Direction::Deposit);
        assert_eq!(deposit.exchange_to_id, Some(a));
        assert_eq!(deposit.exchange_from_id, None);

        let withdraw = Endpoints::resolve(&cat, "0xA1", "0xb0");
        assert_eq!(withdraw.direction, Direction::Withdraw);
        assert_eq!(withdraw.exchange_from_id, Some(a));

        let cross = Endpoints::resolve(&cat, "0xa1", "0xa2");
        assert_eq!(cross.direction, Direction::Internal);
        assert_eq!(cross.exchange_to_id, Some(a_prime));

        let stranger = Endpoints::resolve(&cat, "0xb0", "0xb1");
        assert!(!stranger.is_relevant());
    }
}
