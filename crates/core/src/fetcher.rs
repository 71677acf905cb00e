use core::future::Future;

use alloy_primitives::{Address, B256, U256};
use alloy_rpc_types_eth::EIP1186AccountProofResponse;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::{Error, RawBlock, Result, StorageSlot};

/// A JSON-RPC endpoint of an Ethereum execution node.
pub trait Provider: Send + Sync {
    /// Sends `method` with `params`, returning the `result` member of the response.
    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

/// Block and proof queries against a [Provider].
#[derive(Debug, Clone)]
pub struct ChainFetcher<P> {
    provider: P,
}

impl<P: Provider> ChainFetcher<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn call<T>(&self, method: &'static str, params: Value) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        tracing::debug!("requesting `{method}` with {params}...");

        let result = self
            .provider
            .request(method, params)
            .await
            .map_err(|e| Error::upstream(method, e))?;

        if result.is_null() {
            return Ok(None);
        }

        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| Error::upstream(method, e))
    }

    /// Resolves the number of the block with the provided hash.
    pub async fn resolve_block_number(&self, block_hash: B256) -> Result<u64> {
        #[derive(Deserialize)]
        struct BlockNumber {
            #[serde(with = "alloy_serde::quantity")]
            number: u64,
        }

        self.call::<BlockNumber>("eth_getBlockByHash", json!([block_hash, false]))
            .await?
            .map(|b| b.number)
            .ok_or_else(|| Error::BlockNotFound(block_hash.to_string()))
    }

    /// Fetches the header fields of a block, without transaction bodies.
    pub async fn fetch_block(&self, block_number: u64) -> Result<RawBlock> {
        let block = U256::from(block_number);

        self.call("eth_getBlockByNumber", json!([block, false]))
            .await?
            .ok_or_else(|| Error::BlockNotFound(block_number.to_string()))
    }

    /// Fetches the account proof of `address` and the storage proofs of `storage_keys`.
    pub async fn fetch_proof(
        &self,
        address: Address,
        storage_keys: &[StorageSlot],
        block_number: u64,
    ) -> Result<EIP1186AccountProofResponse> {
        let block = U256::from(block_number);

        self.call("eth_getProof", json!([address, storage_keys, block]))
            .await?
            .ok_or_else(|| {
                Error::upstream("eth_getProof", anyhow::anyhow!("no proof for {address}"))
            })
    }
}

#[cfg(test)]
struct FnProvider<F>(F);

#[cfg(test)]
impl<F> Provider for FnProvider<F>
where
    F: Fn(&'static str, Value) -> anyhow::Result<Value> + Send + Sync,
{
    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> impl Future<Output = anyhow::Result<Value>> + Send {
        core::future::ready((self.0)(method, params))
    }
}

#[cfg(test)]
fn mock<F>(f: F) -> ChainFetcher<FnProvider<F>>
where
    F: Fn(&'static str, Value) -> anyhow::Result<Value> + Send + Sync,
{
    ChainFetcher::new(FnProvider(f))
}

#[tokio::test]
async fn resolve_block_number_works() {
    let hash = B256::repeat_byte(0xab);
    let fetcher = mock(move |method, params| {
        assert_eq!(method, "eth_getBlockByHash");
        assert_eq!(params, json!([hash.to_string(), false]));

        Ok(json!({ "hash": hash, "number": "0x12d687" }))
    });

    assert_eq!(fetcher.resolve_block_number(hash).await.unwrap(), 1234567);
}

#[tokio::test]
async fn null_block_is_not_found() {
    let fetcher = mock(|_, _| Ok(Value::Null));

    assert!(matches!(
        fetcher.resolve_block_number(B256::ZERO).await,
        Err(Error::BlockNotFound(_))
    ));
    assert!(matches!(
        fetcher.fetch_block(1).await,
        Err(Error::BlockNotFound(_))
    ));
}

#[tokio::test]
async fn provider_errors_are_upstream_failures() {
    let fetcher = mock(|_, _| Err(anyhow::anyhow!("connection reset")));

    match fetcher.fetch_proof(Address::ZERO, &[], 1).await {
        Err(Error::UpstreamFetchFailed { method, source }) => {
            assert_eq!(method, "eth_getProof");
            assert_eq!(source.to_string(), "connection reset");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let fetcher = mock(|_, _| Ok(json!({ "number": "not a number" })));

    assert!(matches!(
        fetcher.resolve_block_number(B256::ZERO).await,
        Err(Error::UpstreamFetchFailed {
            method: "eth_getBlockByHash",
            ..
        })
    ));
}

#[tokio::test]
async fn fetch_proof_sends_hex_quantities() {
    let address = Address::repeat_byte(0x11);
    let keys = [
        crate::fixed_slot("0x51").unwrap(),
        crate::derive_slot("0x0", "0x3d569673dAa0575c936c7c67c4E6AedA69CC630C").unwrap(),
    ];
    let expected_keys = json!([keys[0], keys[1]]);

    let fetcher = mock(move |method, params| {
        assert_eq!(method, "eth_getProof");
        assert_eq!(params[0], json!(address));
        assert_eq!(params[1], expected_keys);
        assert_eq!(params[1][0], "0x51");
        assert_eq!(params[2], "0x10d4f");

        Ok(json!({
            "address": address,
            "balance": "0x0",
            "codeHash": B256::repeat_byte(0xcc),
            "nonce": "0x1",
            "storageHash": B256::repeat_byte(0xdd),
            "accountProof": ["0x83646f67"],
            "storageProof": [{
                "key": "0x51",
                "value": "0x2a",
                "proof": ["0x83636174"]
            }]
        }))
    });

    let proof = fetcher.fetch_proof(address, &keys, 68943).await.unwrap();

    assert_eq!(proof.address, address);
    assert_eq!(proof.account_proof.len(), 1);
    assert_eq!(&proof.account_proof[0][..], b"\x83dog");
    assert_eq!(&proof.storage_proof[0].proof[0][..], b"\x83cat");
}
