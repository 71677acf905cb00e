use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{slot, Result, StorageSlot};

/// Number of accounts whose state proofs are packed into a bundle.
pub const BUNDLE_ACCOUNTS: usize = 4;

/// `AaveMisc.AAVE_ECOSYSTEM_RESERVE_CONTROLLER`
pub const ECOSYSTEM_RESERVE_CONTROLLER: &str = "0x3d569673dAa0575c936c7c67c4E6AedA69CC630C";

/// Holder of the aAAVE voting power tracked by the aAAVE delegation mapping.
pub const A_AAVE_HOLDER: &str = "0x329c54289Ff5D6B7b7daE13592C6B1EDA1543eD4";

pub const AAVE: &str = "0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9";
pub const A_AAVE: &str = "0xA700b4eB416Be35b2911fd5Dee80678ff64fF6C9";
pub const STK_AAVE: &str = "0x4da27a545c0c5B758a6BA100e3a049001de870f5";
pub const GOVERNANCE: &str = "0x9AEE0B04504CeF83A65AC3f0e838D0593BCb2BC7";

/// How a storage key of a monitored account is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotSource {
    /// Entry of a `mapping(address => ...)` declared at `base`.
    Mapping { base: String, key: String },

    /// Plain slot of a value type.
    Fixed { slot: String },
}

impl SlotSource {
    pub fn mapping<B, K>(base: B, key: K) -> Self
    where
        B: Into<String>,
        K: Into<String>,
    {
        Self::Mapping {
            base: base.into(),
            key: key.into(),
        }
    }

    pub fn fixed<S: Into<String>>(slot: S) -> Self {
        Self::Fixed { slot: slot.into() }
    }

    pub fn resolve(&self) -> Result<StorageSlot> {
        match self {
            Self::Mapping { base, key } => slot::derive_slot(base, key),
            Self::Fixed { slot } => slot::fixed_slot(slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTarget {
    /// Label used in logs.
    pub name: String,

    /// Contract address.
    pub address: String,

    /// Storage entries included in the account proof request.
    pub slots: Vec<SlotSource>,
}

impl AccountTarget {
    pub fn new<N, A>(name: N, address: A, slots: Vec<SlotSource>) -> Self
    where
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            name: name.into(),
            address: address.into(),
            slots,
        }
    }

    pub fn address(&self) -> Result<Address> {
        slot::parse_address(&self.address)
    }

    pub fn storage_keys(&self) -> Result<Vec<StorageSlot>> {
        self.slots.iter().map(SlotSource::resolve).collect()
    }
}

/// A single slot proven on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTarget {
    pub name: String,
    pub address: String,
    pub slot: String,
}

impl SlotTarget {
    pub fn address(&self) -> Result<Address> {
        slot::parse_address(&self.address)
    }

    pub fn slot(&self) -> Result<StorageSlot> {
        slot::fixed_slot(&self.slot)
    }
}

/// The contracts and slots packed into a proof bundle.
///
/// Account proofs are encoded in the order of `accounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRootsConfig {
    pub accounts: [AccountTarget; BUNDLE_ACCOUNTS],
    pub exchange_rate: SlotTarget,
}

impl Default for StorageRootsConfig {
    fn default() -> Self {
        Self {
            accounts: [
                AccountTarget::new(
                    "aave",
                    AAVE,
                    vec![SlotSource::mapping("0x0", ECOSYSTEM_RESERVE_CONTROLLER)],
                ),
                AccountTarget::new(
                    "a-aave",
                    A_AAVE,
                    vec![
                        SlotSource::mapping("0x34", A_AAVE_HOLDER),
                        SlotSource::fixed("0x40"),
                    ],
                ),
                AccountTarget::new(
                    "stk-aave",
                    STK_AAVE,
                    vec![
                        SlotSource::mapping("0x0", ECOSYSTEM_RESERVE_CONTROLLER),
                        SlotSource::fixed("0x51"),
                    ],
                ),
                AccountTarget::new("governance", GOVERNANCE, vec![SlotSource::fixed("0x9")]),
            ],
            exchange_rate: SlotTarget {
                name: "stk-aave-exchange-rate".into(),
                address: STK_AAVE.into(),
                slot: "0x51".into(),
            },
        }
    }
}

#[test]
fn default_config_resolves() {
    let config = StorageRootsConfig::default();

    for account in &config.accounts {
        account.address().unwrap();
        assert!(!account.storage_keys().unwrap().is_empty());
    }

    let rate = config.exchange_rate.slot().unwrap();
    assert_eq!(rate, slot::fixed_slot("0x51").unwrap());
    assert_eq!(
        config.exchange_rate.address().unwrap(),
        config.accounts[2].address().unwrap()
    );

    let stk_keys = config.accounts[2].storage_keys().unwrap();
    assert_eq!(
        stk_keys[0],
        slot::derive_slot("0x0", ECOSYSTEM_RESERVE_CONTROLLER).unwrap()
    );
    assert_eq!(stk_keys[1], rate);
}

#[test]
fn config_serde_roundtrip() {
    let config = StorageRootsConfig::default();
    let value = serde_json::to_value(&config).unwrap();

    assert_eq!(value["accounts"][1]["slots"][0]["kind"], "mapping");
    assert_eq!(value["accounts"][1]["slots"][1]["slot"], "0x40");

    let parsed: StorageRootsConfig = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn malformed_target_is_invalid_argument() {
    let account = AccountTarget::new("broken", AAVE, vec![SlotSource::mapping("0x0", "0xnope")]);

    assert!(matches!(
        account.storage_keys(),
        Err(crate::Error::InvalidArgument(_))
    ));
}
