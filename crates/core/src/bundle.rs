use alloy_primitives::{Bytes, B256};
use alloy_rpc_types_eth::EIP1186AccountProofResponse;
use alloy_sol_types::SolValue as _;

use crate::{
    codec, header, ChainFetcher, Error, ProofBundle, Provider, Result, StorageRootsConfig,
};

/// `(bytes32, bytes, bytes, bytes, bytes, bytes, bytes32, bytes)`
type BundleTuple = (B256, Bytes, Bytes, Bytes, Bytes, Bytes, B256, Bytes);

impl ProofBundle {
    /// ABI encodes the bundle as the parameters of the verifier call.
    pub fn abi_encode(&self) -> Bytes {
        let [a, b, c, d] = self.account_proofs.clone();

        (
            self.block_hash,
            self.header_rlp.clone(),
            a,
            b,
            c,
            d,
            self.exchange_rate_slot,
            self.slot_proof_rlp.clone(),
        )
            .abi_encode_params()
            .into()
    }

    pub fn abi_decode(data: &[u8]) -> Result<Self> {
        let (block_hash, header_rlp, a, b, c, d, exchange_rate_slot, slot_proof_rlp) =
            BundleTuple::abi_decode_params(data, true)
                .map_err(|e| Error::invalid_argument(format!("invalid proof bundle: {e}")))?;

        Ok(Self {
            block_hash,
            header_rlp,
            account_proofs: [a, b, c, d],
            exchange_rate_slot,
            slot_proof_rlp,
        })
    }
}

/// Assembles storage proof bundles for the configured accounts.
#[derive(Debug, Clone)]
pub struct StorageRoots<P> {
    fetcher: ChainFetcher<P>,
    config: StorageRootsConfig,
}

impl<P: Provider> StorageRoots<P> {
    pub fn new(fetcher: ChainFetcher<P>, config: StorageRootsConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &StorageRootsConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &ChainFetcher<P> {
        &self.fetcher
    }

    /// Builds the proof bundle of the block with the provided hash.
    ///
    /// The block and all the proofs are requested concurrently once the block number is
    /// known. Any failure aborts the whole bundle.
    pub async fn build_proof_bundle(&self, block_hash: B256) -> Result<ProofBundle> {
        let number = self.fetcher.resolve_block_number(block_hash).await?;

        tracing::debug!("block {block_hash} resolved to {number}...");

        let addresses = self
            .config
            .accounts
            .iter()
            .map(|a| a.address())
            .collect::<Result<Vec<_>>>()?;

        let keys = self
            .config
            .accounts
            .iter()
            .map(|a| a.storage_keys())
            .collect::<Result<Vec<_>>>()?;

        let rate_address = self.config.exchange_rate.address()?;
        let rate_slot = self.config.exchange_rate.slot()?;
        let rate_keys = [rate_slot];

        let (block, p0, p1, p2, p3, rate) = tokio::try_join!(
            self.fetcher.fetch_block(number),
            self.fetcher.fetch_proof(addresses[0], &keys[0], number),
            self.fetcher.fetch_proof(addresses[1], &keys[1], number),
            self.fetcher.fetch_proof(addresses[2], &keys[2], number),
            self.fetcher.fetch_proof(addresses[3], &keys[3], number),
            self.fetcher.fetch_proof(rate_address, &rate_keys, number),
        )?;

        tracing::debug!("block {number} data and proofs fetched...");

        if block.hash != block_hash {
            tracing::warn!(
                "block {number} hash {} differs from the requested {block_hash}",
                block.hash
            );
        }

        let header_rlp = header::prepare_block_rlp(&block)?;

        let account_proofs = [
            account_proof_rlp(&p0)?,
            account_proof_rlp(&p1)?,
            account_proof_rlp(&p2)?,
            account_proof_rlp(&p3)?,
        ];

        let slot_proof = rate.storage_proof.first().ok_or_else(|| {
            Error::upstream(
                "eth_getProof",
                anyhow::anyhow!("no storage proof for slot {rate_slot} of {rate_address}"),
            )
        })?;
        let slot_proof_rlp = codec::reencode_proof_list(&slot_proof.proof)?;

        Ok(ProofBundle {
            block_hash: block.hash,
            header_rlp,
            account_proofs,
            exchange_rate_slot: *rate_slot.as_b256(),
            slot_proof_rlp,
        })
    }
}

fn account_proof_rlp(proof: &EIP1186AccountProofResponse) -> Result<Bytes> {
    codec::reencode_proof_list(&proof.account_proof)
}

#[test]
fn bundle_abi_layout_is_stable() {
    let bundle = ProofBundle {
        block_hash: B256::repeat_byte(0x11),
        header_rlp: Bytes::from_static(&[0xc0]),
        account_proofs: [
            Bytes::from_static(&[0xc1, 0x01]),
            Bytes::from_static(&[0xc1, 0x02]),
            Bytes::from_static(&[0xc1, 0x03]),
            Bytes::from_static(&[0xc1, 0x04]),
        ],
        exchange_rate_slot: B256::with_last_byte(0x51),
        slot_proof_rlp: Bytes::new(),
    };

    let encoded = bundle.abi_encode();

    // eight head words, then one length word and one data word per non empty `bytes`
    assert_eq!(encoded.len(), 32 * 8 + 5 * 64 + 32);
    assert_eq!(&encoded[..32], bundle.block_hash.as_slice());
    assert_eq!(&encoded[32 * 6..32 * 7], bundle.exchange_rate_slot.as_slice());

    // offset of the header rlp points right after the head
    assert_eq!(encoded[32 * 2 - 1], 0x00);
    assert_eq!(encoded[32 * 2 - 2], 0x01);

    assert_eq!(ProofBundle::abi_decode(&encoded).unwrap(), bundle);
}

#[test]
fn truncated_bundle_fails_to_decode() {
    let bundle = ProofBundle {
        block_hash: B256::ZERO,
        header_rlp: Bytes::from_static(&[0xc0]),
        account_proofs: Default::default(),
        exchange_rate_slot: B256::ZERO,
        slot_proof_rlp: Bytes::new(),
    };

    let encoded = bundle.abi_encode();

    assert!(matches!(
        ProofBundle::abi_decode(&encoded[..encoded.len() - 1]),
        Err(Error::InvalidArgument(_))
    ));
}
