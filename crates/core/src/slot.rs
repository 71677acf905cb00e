use core::{fmt, str::FromStr as _};

use alloy_primitives::{hex, Address, Bytes, B256, U256};
use serde::{Serialize, Serializer};

use crate::{Error, Result};

/// A 32 bytes storage cell identifier.
///
/// Serializes as a hex quantity without leading zeros, the same minimal form used
/// for storage keys of `eth_getProof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageSlot(B256);

impl StorageSlot {
    pub const fn new(slot: B256) -> Self {
        Self(slot)
    }

    pub const fn as_b256(&self) -> &B256 {
        &self.0
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_be_bytes(self.0 .0)
    }

    /// The slot bytes with the leading zero bytes stripped.
    pub fn to_minimal_bytes(&self) -> Bytes {
        let first = self.0.iter().position(|b| *b != 0).unwrap_or(32);

        Bytes::copy_from_slice(&self.0[first..])
    }
}

impl From<B256> for StorageSlot {
    fn from(slot: B256) -> Self {
        Self(slot)
    }
}

impl From<U256> for StorageSlot {
    fn from(slot: U256) -> Self {
        Self(B256::from(slot.to_be_bytes::<32>()))
    }
}

/// The minimal form as a hex quantity; zero is `0x0`.
impl fmt::Display for StorageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = hex::encode(self.to_minimal_bytes());
        let digits = digits.strip_prefix('0').unwrap_or(&digits);

        if digits.is_empty() {
            f.write_str("0x0")
        } else {
            write!(f, "0x{digits}")
        }
    }
}

impl Serialize for StorageSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Computes the slot of `mapping[key]` for a mapping declared at `base`.
///
/// `keccak256(abi.encode(address key, uint256 base))`
pub fn mapping_slot(base: U256, key: Address) -> StorageSlot {
    let key = key.into_word();
    let base = base.to_be_bytes::<32>();
    let slot = [key.as_slice(), base.as_slice()].concat();

    StorageSlot(alloy_primitives::keccak256(slot))
}

/// Parses a hex slot of at most 32 bytes, left padding it to 32 bytes.
pub fn fixed_slot(slot: &str) -> Result<StorageSlot> {
    parse_slot(slot).map(StorageSlot::from)
}

/// Derives the storage slot of a mapping entry keyed by an address.
///
/// Both arguments are `0x` prefixed hex strings.
pub fn derive_slot(base_slot: &str, key: &str) -> Result<StorageSlot> {
    let base = parse_slot(base_slot)?;
    let key = parse_address(key)?;

    Ok(mapping_slot(base, key))
}

pub fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|e| Error::invalid_argument(format!("invalid address `{address}`: {e}")))
}

fn parse_slot(slot: &str) -> Result<U256> {
    let digits = slot.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_argument(format!("invalid storage slot `{slot}`")));
    }

    U256::from_str_radix(digits, 16)
        .map_err(|e| Error::invalid_argument(format!("invalid storage slot `{slot}`: {e}")))
}

#[test]
fn mapping_slot_matches_solidity_layout() {
    // mapping(address => ...) at slot 0, key address(0)
    let slot = derive_slot("0x0", "0x0000000000000000000000000000000000000000").unwrap();

    assert_eq!(
        slot.as_b256().to_string(),
        "0xad3228b676f7d3cd4284a5443f17f1962b36e491b30a40b2405849e597ba5fb5"
    );

    let key = "0x329c54289Ff5D6B7b7daE13592C6B1EDA1543eD4";
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(&hex::decode(&key[2..]).unwrap());
    preimage[63] = 0x34;

    let expected = alloy_primitives::keccak256(preimage);

    assert_eq!(derive_slot("0x34", key).unwrap().as_b256(), &expected);
}

#[test]
fn derive_slot_is_deterministic() {
    let key = "0x3d569673dAa0575c936c7c67c4E6AedA69CC630C";
    let first = derive_slot("0x0", key).unwrap();

    // unrelated derivations in between must not matter
    derive_slot("0x34", "0x329c54289Ff5D6B7b7daE13592C6B1EDA1543eD4").unwrap();

    assert_eq!(first, derive_slot("0x0", key).unwrap());
    assert_eq!(first, derive_slot("0x00", &key.to_lowercase()).unwrap());
    assert_eq!(
        first,
        derive_slot(
            "0x0000000000000000000000000000000000000000000000000000000000000000",
            key
        )
        .unwrap()
    );
}

#[test]
fn derive_slot_rejects_malformed_input() {
    let key = "0x3d569673dAa0575c936c7c67c4E6AedA69CC630C";

    for slot in ["", "0x", "0xzz", "slot", &format!("0x1{}", "0".repeat(64))] {
        assert!(
            matches!(derive_slot(slot, key), Err(Error::InvalidArgument(_))),
            "slot `{slot}` should be rejected"
        );
    }

    for key in [
        "",
        "0x1234",
        "0x3d569673dAa0575c936c7c67c4E6AedA69CC630Cff",
        "0xgg569673dAa0575c936c7c67c4E6AedA69CC630C",
    ] {
        assert!(
            matches!(derive_slot("0x0", key), Err(Error::InvalidArgument(_))),
            "key `{key}` should be rejected"
        );
    }
}

#[test]
fn storage_slot_minimal_form_strips_leading_zeros() {
    let slot = fixed_slot("0x51").unwrap();

    assert_eq!(
        slot.as_b256().to_string(),
        "0x0000000000000000000000000000000000000000000000000000000000000051"
    );
    assert_eq!(&slot.to_minimal_bytes()[..], &[0x51]);
    assert_eq!(slot.to_string(), "0x51");
    assert_eq!(serde_json::to_value(slot).unwrap(), "0x51");

    let zero = fixed_slot("0x0").unwrap();
    assert!(zero.to_minimal_bytes().is_empty());
    assert_eq!(serde_json::to_value(zero).unwrap(), "0x0");

    let mut bytes = [0xffu8; 32];
    bytes[0] = 0;
    bytes[1] = 0;
    bytes[2] = 0x0f;
    let slot = StorageSlot::new(B256::from(bytes));
    assert_eq!(slot.to_minimal_bytes().len(), 30);
    assert_eq!(slot.to_minimal_bytes()[0], 0x0f);
    assert_eq!(slot.to_string(), format!("0xf{}", "f".repeat(58)));

    // a single leading zero nibble is dropped from the wire form
    let slot = fixed_slot("0x100").unwrap();
    assert_eq!(&slot.to_minimal_bytes()[..], &[0x01, 0x00]);
    assert_eq!(serde_json::to_value(slot).unwrap(), "0x100");
    assert_eq!(
        serde_json::to_value(slot).unwrap(),
        serde_json::to_value(slot.to_u256()).unwrap()
    );
}

#[test]
fn unprefixed_slots_are_hex() {
    assert_eq!(fixed_slot("51").unwrap(), fixed_slot("0x51").unwrap());
    assert_eq!(fixed_slot("0X34").unwrap(), fixed_slot("0x34").unwrap());
    assert_eq!(fixed_slot("51").unwrap().to_u256(), U256::from(0x51));
}
