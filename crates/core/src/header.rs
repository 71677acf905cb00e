use alloy_primitives::{Bytes, U256};

use crate::{Error, RawBlock, Result};

/// Number of fields of a Shanghai block header.
pub const HEADER_FIELDS: usize = 17;

/// The header fields of a block, in consensus order, as RLP byte strings.
///
/// Integers are minimal big-endian with zero as the empty string; hashes, the
/// beneficiary, the bloom, the extra data and the nonce are copied as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeader {
    pub fields: [Bytes; HEADER_FIELDS],
}

impl NormalizedHeader {
    /// Builds the header of a block produced after the London and Shanghai forks.
    pub fn new(block: &RawBlock) -> Result<Self> {
        let base_fee = block
            .base_fee_per_gas
            .ok_or(Error::UnsupportedBlock {
                number: block.number,
                field: "baseFeePerGas",
            })?;

        let withdrawals_root = block
            .withdrawals_root
            .ok_or(Error::UnsupportedBlock {
                number: block.number,
                field: "withdrawalsRoot",
            })?;

        let fields = [
            Bytes::copy_from_slice(block.parent_hash.as_slice()),
            Bytes::copy_from_slice(block.sha3_uncles.as_slice()),
            Bytes::copy_from_slice(block.miner.as_slice()),
            Bytes::copy_from_slice(block.state_root.as_slice()),
            Bytes::copy_from_slice(block.transactions_root.as_slice()),
            Bytes::copy_from_slice(block.receipts_root.as_slice()),
            Bytes::copy_from_slice(block.logs_bloom.as_slice()),
            // difficulty is zero since the merge
            Bytes::new(),
            quantity(U256::from(block.number)),
            quantity(U256::from(block.gas_limit)),
            quantity(U256::from(block.gas_used)),
            quantity(U256::from(block.timestamp)),
            block.extra_data.clone(),
            Bytes::copy_from_slice(block.mix_hash.as_slice()),
            Bytes::copy_from_slice(block.nonce.as_slice()),
            quantity(base_fee),
            Bytes::copy_from_slice(withdrawals_root.as_slice()),
        ];

        Ok(Self { fields })
    }

    pub fn rlp(&self) -> Bytes {
        let fields: Vec<&[u8]> = self.fields.iter().map(|f| &f[..]).collect();
        let mut out = Vec::with_capacity(alloy_rlp::list_length::<_, [u8]>(&fields));

        alloy_rlp::encode_list::<_, [u8]>(&fields, &mut out);

        out.into()
    }
}

/// Normalizes the block header and encodes it as a RLP list.
pub fn prepare_block_rlp(block: &RawBlock) -> Result<Bytes> {
    NormalizedHeader::new(block).map(|h| h.rlp())
}

fn quantity(value: U256) -> Bytes {
    value.to_be_bytes_trimmed_vec().into()
}

#[cfg(test)]
fn shanghai_block() -> RawBlock {
    use alloy_primitives::{Address, Bloom, B256, B64};

    RawBlock {
        hash: B256::repeat_byte(0x01),
        parent_hash: B256::repeat_byte(0x02),
        sha3_uncles: B256::repeat_byte(0x03),
        miner: Address::repeat_byte(0x04),
        state_root: B256::repeat_byte(0x05),
        transactions_root: B256::repeat_byte(0x06),
        receipts_root: B256::repeat_byte(0x07),
        logs_bloom: Bloom::repeat_byte(0x08),
        number: 17_034_870,
        gas_limit: 30_000_000,
        gas_used: 0x0100,
        timestamp: 1_681_338_455,
        extra_data: Bytes::from_static(b"builder"),
        mix_hash: B256::repeat_byte(0x09),
        nonce: B64::ZERO,
        base_fee_per_gas: Some(U256::from(0x3b9aca00u64)),
        withdrawals_root: Some(B256::repeat_byte(0x0a)),
    }
}

#[cfg(test)]
fn decoded_fields(rlp: &[u8]) -> Vec<Vec<u8>> {
    rlp::Rlp::new(rlp).as_list().unwrap()
}

#[test]
fn header_rlp_follows_consensus_order() {
    let block = shanghai_block();
    let fields = decoded_fields(&prepare_block_rlp(&block).unwrap());

    assert_eq!(fields.len(), HEADER_FIELDS);
    assert_eq!(fields[0], block.parent_hash.to_vec());
    assert_eq!(fields[2], block.miner.to_vec());
    assert_eq!(fields[6].len(), 256);
    assert!(fields[7].is_empty());
    assert_eq!(fields[8], 17_034_870u64.to_be_bytes()[4..].to_vec());
    assert_eq!(fields[9], 30_000_000u64.to_be_bytes()[4..].to_vec());
    assert_eq!(fields[12], b"builder".to_vec());
    assert_eq!(fields[14], vec![0u8; 8]);
    assert_eq!(fields[15], vec![0x3b, 0x9a, 0xca, 0x00]);
    assert_eq!(fields[16], vec![0x0a; 32]);
}

#[test]
fn header_rlp_matches_reference_encoder() {
    let block = shanghai_block();

    let mut s = rlp::RlpStream::new_list(HEADER_FIELDS);
    s.append(&block.parent_hash.to_vec())
        .append(&block.sha3_uncles.to_vec())
        .append(&block.miner.to_vec())
        .append(&block.state_root.to_vec())
        .append(&block.transactions_root.to_vec())
        .append(&block.receipts_root.to_vec())
        .append(&block.logs_bloom.to_vec())
        .append_empty_data()
        .append(&block.number)
        .append(&block.gas_limit)
        .append(&block.gas_used)
        .append(&block.timestamp)
        .append(&block.extra_data.to_vec())
        .append(&block.mix_hash.to_vec())
        .append(&block.nonce.to_vec())
        .append(&0x3b9aca00u64)
        .append(&vec![0x0au8; 32]);

    assert_eq!(prepare_block_rlp(&block).unwrap().to_vec(), s.out().to_vec());
}

#[test]
fn zero_gas_used_is_empty() {
    let mut block = shanghai_block();
    block.gas_used = 0;

    let header = NormalizedHeader::new(&block).unwrap();
    assert!(header.fields[10].is_empty());

    let fields = decoded_fields(&header.rlp());
    assert!(fields[10].is_empty());

    // the empty string, never a single zero byte
    let rlp = header.rlp();
    let gas_limit = alloy_rlp::encode(&header.fields[9][..]);
    let at = rlp
        .windows(gas_limit.len())
        .position(|w| w == gas_limit.as_slice())
        .unwrap();
    assert_eq!(rlp[at + gas_limit.len()], 0x80);
}

#[test]
fn non_zero_gas_used_is_minimal() {
    let mut block = shanghai_block();

    for (gas_used, expected) in [
        (1u64, vec![0x01]),
        (0xff, vec![0xff]),
        (0x0100, vec![0x01, 0x00]),
        (21_000, vec![0x52, 0x08]),
        (29_999_999, vec![0x01, 0xc9, 0xc3, 0x7f]),
    ] {
        block.gas_used = gas_used;

        let header = NormalizedHeader::new(&block).unwrap();
        assert_eq!(header.fields[10].to_vec(), expected);
        assert_ne!(header.fields[10][0], 0);
    }
}

#[test]
fn pre_fork_blocks_are_unsupported() {
    let mut block = shanghai_block();
    block.withdrawals_root = None;

    assert!(matches!(
        prepare_block_rlp(&block),
        Err(Error::UnsupportedBlock {
            number: 17_034_870,
            field: "withdrawalsRoot"
        })
    ));

    block.base_fee_per_gas = None;

    assert!(matches!(
        prepare_block_rlp(&block),
        Err(Error::UnsupportedBlock {
            field: "baseFeePerGas",
            ..
        })
    ));
}
