use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U256};
use serde::{Deserialize, Serialize};

mod bundle;
mod codec;
mod config;
mod error;
mod fetcher;
mod handler;
mod header;
mod slot;

pub use bundle::*;
pub use codec::*;
pub use config::*;
pub use error::*;
pub use fetcher::*;
pub use handler::*;
pub use header::*;
pub use slot::*;

/// Block fields returned by `eth_getBlockByNumber` without transaction bodies.
///
/// Fields introduced by London and Shanghai are optional; their absence is reported
/// by the header normalizer instead of producing a bogus header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub hash: B256,
    pub parent_hash: B256,
    pub sha3_uncles: B256,
    pub miner: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: B64,

    /// London.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,

    /// Shanghai.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<B256>,
}

/// The proofs consumed by the on-chain storage roots verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofBundle {
    /// Hash of the proven block.
    pub block_hash: B256,

    /// RLP encoded block header.
    pub header_rlp: Bytes,

    /// RLP list of the account proof nodes, one per configured account.
    pub account_proofs: [Bytes; BUNDLE_ACCOUNTS],

    /// Storage slot of the exchange rate, padded to 32 bytes.
    pub exchange_rate_slot: B256,

    /// RLP list of the exchange rate storage proof nodes.
    pub slot_proof_rlp: Bytes,
}
