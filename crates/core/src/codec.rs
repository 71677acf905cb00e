use alloy_primitives::Bytes;
use alloy_rlp::{BufMut, Decodable, Encodable, Header};

use crate::Result;

/// A decoded RLP item: either a byte string or a list of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpNode {
    Bytes(Bytes),
    List(Vec<RlpNode>),
}

impl Encodable for RlpNode {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Bytes(b) => b[..].encode(out),
            Self::List(items) => alloy_rlp::encode_list::<_, RlpNode>(items, out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Bytes(b) => b[..].length(),
            Self::List(items) => alloy_rlp::list_length::<_, RlpNode>(items),
        }
    }
}

impl Decodable for RlpNode {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        let data: &[u8] = *buf;

        if data.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort);
        }

        let (mut payload, rest) = data.split_at(header.payload_length);

        *buf = rest;

        if !header.list {
            return Ok(Self::Bytes(Bytes::copy_from_slice(payload)));
        }

        let mut items = Vec::new();

        while !payload.is_empty() {
            items.push(Self::decode(&mut payload)?);
        }

        Ok(Self::List(items))
    }
}

/// Decodes a single RLP encoded proof node.
///
/// The node must span the whole input; trailing bytes are rejected.
pub fn decode_node(node: &[u8]) -> Result<RlpNode> {
    let mut buf = node;
    let decoded = RlpNode::decode(&mut buf)?;

    if !buf.is_empty() {
        return Err(alloy_rlp::Error::Custom("trailing bytes after rlp node").into());
    }

    Ok(decoded)
}

/// Decodes every node of a proof and encodes them back as the items of one RLP list.
pub fn reencode_proof_list<N>(nodes: &[N]) -> Result<Bytes>
where
    N: AsRef<[u8]>,
{
    let decoded = nodes
        .iter()
        .map(|n| decode_node(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(alloy_rlp::list_length::<_, RlpNode>(&decoded));
    alloy_rlp::encode_list::<_, RlpNode>(&decoded, &mut out);

    Ok(out.into())
}

#[cfg(test)]
fn encoded_strings(items: &[&[u8]]) -> Vec<Vec<u8>> {
    items.iter().map(|i| rlp::encode(&i.to_vec()).to_vec()).collect()
}

#[test]
fn decode_node_reads_nested_lists() {
    // ["cat", ["dog", 0x05], ""]
    let node = hex::decode("cb83636174c583646f670580").unwrap();
    let decoded = decode_node(&node).unwrap();

    assert_eq!(
        decoded,
        RlpNode::List(vec![
            RlpNode::Bytes(Bytes::from_static(b"cat")),
            RlpNode::List(vec![
                RlpNode::Bytes(Bytes::from_static(b"dog")),
                RlpNode::Bytes(Bytes::from_static(&[0x05])),
            ]),
            RlpNode::Bytes(Bytes::new()),
        ])
    );
    assert_eq!(alloy_rlp::encode(&decoded), node);
}

#[test]
fn decode_node_rejects_malformed_input() {
    // truncated list payload
    assert!(matches!(
        decode_node(&hex::decode("c88363617483").unwrap()),
        Err(crate::Error::Codec(_))
    ));

    // single byte below 0x80 must not be wrapped in a string header
    assert!(matches!(
        decode_node(&hex::decode("8105").unwrap()),
        Err(crate::Error::Codec(_))
    ));

    // trailing bytes after a complete item
    assert!(matches!(
        decode_node(&hex::decode("83646f6700").unwrap()),
        Err(crate::Error::Codec(_))
    ));

    assert!(matches!(decode_node(&[]), Err(crate::Error::Codec(_))));
}

#[test]
fn reencode_proof_list_keeps_order_and_content() {
    let originals: [&[u8]; 4] = [b"root", &[0x01], b"", &[0xab; 40]];
    let nodes = encoded_strings(&originals);

    let encoded = reencode_proof_list(&nodes).unwrap();
    let decoded: Vec<Vec<u8>> = rlp::Rlp::new(&encoded).as_list().unwrap();

    assert_eq!(decoded.len(), originals.len());
    for (d, o) in decoded.iter().zip(originals) {
        assert_eq!(d.as_slice(), o);
    }
}

#[test]
fn reencode_proof_list_is_idempotent() {
    let branch = {
        let mut s = rlp::RlpStream::new_list(17);
        for i in 0..16u8 {
            s.append(&vec![i; 32]);
        }
        s.append_empty_data();
        s.out().to_vec()
    };
    let leaf = {
        let mut s = rlp::RlpStream::new_list(2);
        s.append(&vec![0x20, 0x1f]).append(&vec![0x82, 0x01, 0x00]);
        s.out().to_vec()
    };
    let nodes = vec![branch, leaf];

    let once = reencode_proof_list(&nodes).unwrap();

    let RlpNode::List(items) = decode_node(&once).unwrap() else {
        panic!("expected a list");
    };
    let items: Vec<Vec<u8>> = items.iter().map(alloy_rlp::encode).collect();
    let twice = reencode_proof_list(&items).unwrap();

    assert_eq!(once, twice);
    assert_eq!(items, nodes);
}

#[test]
fn reencode_proof_list_handles_empty_proof() {
    let nodes: Vec<Vec<u8>> = Vec::new();

    assert_eq!(&reencode_proof_list(&nodes).unwrap()[..], &[0xc0]);
}
