use core::{str::FromStr as _, time::Duration};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use alloy_primitives::{keccak256, B256, U256};
use serde_json::{json, Value};
use storage_roots::{
    handle, prepare_block_rlp, AccountTarget, ChainFetcher, Error, ProofBundle, Provider, RawBlock,
    Reporter, SlotSource, StorageRoots, StorageRootsConfig, A_AAVE, STK_AAVE,
};
use tokio::{sync::Barrier, time};

const BLOCK: &str = include_str!("../../../assets/block.json");
const PROOFS: &str = include_str!("../../../assets/proofs.json");

/// Answers the calls from the fixtures, as an archive node would.
struct Fixtures {
    block: Value,
    proofs: Value,
    calls: Mutex<Vec<(&'static str, Value)>>,
    barrier: Option<Arc<Barrier>>,
    failing: Option<String>,
    without_storage: Option<String>,
}

impl Fixtures {
    fn load() -> Self {
        Self {
            block: serde_json::from_str(BLOCK).unwrap(),
            proofs: serde_json::from_str(PROOFS).unwrap(),
            calls: Mutex::new(Vec::new()),
            barrier: None,
            failing: None,
            without_storage: None,
        }
    }

    /// Fails every `eth_getProof` of `address`.
    fn failing_proof(mut self, address: &str) -> Self {
        self.failing.replace(address.to_lowercase());
        self
    }

    /// Answers the `eth_getProof` of `address` with no storage proofs.
    fn without_storage_proof(mut self, address: &str) -> Self {
        self.without_storage.replace(address.to_lowercase());
        self
    }

    /// Holds every call after the block resolution until all of them are in flight.
    fn with_barrier(mut self, n: usize) -> Self {
        self.barrier.replace(Arc::new(Barrier::new(n)));
        self
    }

    fn block_hash(&self) -> B256 {
        serde_json::from_value(self.block["hash"].clone()).unwrap()
    }

    fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|(m, _)| *m).collect()
    }

    fn respond(&self, method: &'static str, params: &Value) -> anyhow::Result<Value> {
        match method {
            "eth_getBlockByHash" if params[0] == self.block["hash"] => Ok(json!({
                "hash": self.block["hash"],
                "number": self.block["number"],
            })),

            "eth_getBlockByNumber" if params[0] == self.block["number"] => Ok(self.block.clone()),

            "eth_getBlockByHash" | "eth_getBlockByNumber" => Ok(Value::Null),

            "eth_getProof" => {
                let address = params[0].as_str().unwrap().to_lowercase();

                if self.failing.as_ref() == Some(&address) {
                    anyhow::bail!("connection reset by peer");
                }

                let mut proof = self.proofs[&address].clone();

                if self.without_storage.as_ref() == Some(&address) {
                    proof["storageProof"] = json!([]);

                    return Ok(proof);
                }

                let keys: Vec<U256> = params[1]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|k| U256::from_str(k.as_str().unwrap()).unwrap())
                    .collect();

                let storage: Vec<Value> = proof["storageProof"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter(|p| keys.contains(&U256::from_str(p["key"].as_str().unwrap()).unwrap()))
                    .cloned()
                    .collect();

                proof["storageProof"] = Value::Array(storage);

                Ok(proof)
            }

            _ => anyhow::bail!("unexpected method `{method}`"),
        }
    }
}

impl Provider for Fixtures {
    async fn request(&self, method: &'static str, params: Value) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push((method, params.clone()));

        if let Some(barrier) = &self.barrier {
            if method != "eth_getBlockByHash" {
                barrier.wait().await;
            }
        }

        self.respond(method, &params)
    }
}

#[derive(Default)]
struct CountingReporter {
    captured: Mutex<Vec<String>>,
    flushes: AtomicUsize,
}

impl Reporter for CountingReporter {
    fn capture(&self, error: &Error) {
        self.captured.lock().unwrap().push(error.to_string());
    }

    async fn flush(&self, _timeout: Duration) -> bool {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn hex_bytes(value: &Value) -> Vec<u8> {
    let value = value.as_str().unwrap();

    hex::decode(value.strip_prefix("0x").unwrap()).unwrap()
}

fn rlp_list(nodes: &Value) -> Vec<u8> {
    let nodes = nodes.as_array().unwrap();
    let mut s = rlp::RlpStream::new_list(nodes.len());

    for node in nodes {
        s.append_raw(&hex_bytes(node), 1);
    }

    s.out().to_vec()
}

fn quantity(value: &Value) -> u64 {
    u64::from_str_radix(value.as_str().unwrap().strip_prefix("0x").unwrap(), 16).unwrap()
}

fn expected_header(block: &Value) -> Vec<u8> {
    let mut s = rlp::RlpStream::new_list(17);

    for field in [
        "parentHash",
        "sha3Uncles",
        "miner",
        "stateRoot",
        "transactionsRoot",
        "receiptsRoot",
        "logsBloom",
    ] {
        s.append(&hex_bytes(&block[field]));
    }

    s.append_empty_data();

    for field in ["number", "gasLimit", "gasUsed", "timestamp"] {
        s.append(&quantity(&block[field]));
    }

    s.append(&hex_bytes(&block["extraData"]))
        .append(&hex_bytes(&block["mixHash"]))
        .append(&hex_bytes(&block["nonce"]))
        .append(&quantity(&block["baseFeePerGas"]))
        .append(&hex_bytes(&block["withdrawalsRoot"]));

    s.out().to_vec()
}

#[tokio::test]
async fn build_proof_bundle_works() {
    let fixtures = Fixtures::load();
    let block_hash = fixtures.block_hash();
    let block = fixtures.block.clone();
    let proofs = fixtures.proofs.clone();

    let roots = StorageRoots::new(ChainFetcher::new(fixtures), StorageRootsConfig::default());
    let bundle = roots.build_proof_bundle(block_hash).await.unwrap();

    assert_eq!(bundle.block_hash, block_hash);
    assert_eq!(keccak256(&bundle.header_rlp), block_hash);
    assert_eq!(bundle.header_rlp.to_vec(), expected_header(&block));

    for (account, proof) in roots.config().accounts.iter().zip(&bundle.account_proofs) {
        let address = account.address.to_lowercase();

        assert_eq!(
            proof.to_vec(),
            rlp_list(&proofs[&address]["accountProof"]),
            "account proof of `{}`",
            account.name
        );
    }

    let stk_aave = roots.config().exchange_rate.address.to_lowercase();
    let rate_proof = proofs[&stk_aave]["storageProof"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| U256::from_str(p["key"].as_str().unwrap()).unwrap() == U256::from(0x51))
        .unwrap();

    assert_eq!(bundle.exchange_rate_slot, B256::with_last_byte(0x51));
    assert_eq!(bundle.slot_proof_rlp.to_vec(), rlp_list(&rate_proof["proof"]));

    let methods = roots.fetcher().provider().methods();

    assert_eq!(methods.len(), 7);
    assert_eq!(methods[0], "eth_getBlockByHash");
    assert_eq!(methods.iter().filter(|m| **m == "eth_getBlockByNumber").count(), 1);
    assert_eq!(methods.iter().filter(|m| **m == "eth_getProof").count(), 5);
}

#[tokio::test]
async fn handle_returns_the_abi_encoded_bundle() {
    let fixtures = Fixtures::load();
    let block_hash = fixtures.block_hash();
    let roots = StorageRoots::new(ChainFetcher::new(fixtures), StorageRootsConfig::default());
    let reporter = CountingReporter::default();

    let upper = format!("0x{}", hex::encode_upper(block_hash));
    let response = handle(&roots, &reporter, Some(&upper), Duration::from_millis(10)).await;

    let data = match response {
        storage_roots::StorageRootsResponse::Ok { data } => data,
        other => panic!("unexpected response: {other:?}"),
    };

    let decoded = ProofBundle::abi_decode(&data).unwrap();

    assert_eq!(decoded, roots.build_proof_bundle(block_hash).await.unwrap());
    assert!(reporter.captured.lock().unwrap().is_empty());
    assert_eq!(reporter.flushes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_block_stops_before_any_proof() {
    let roots = StorageRoots::new(
        ChainFetcher::new(Fixtures::load()),
        StorageRootsConfig::default(),
    );

    let ret = roots.build_proof_bundle(B256::repeat_byte(0xee)).await;

    assert!(matches!(ret, Err(Error::BlockNotFound(_))));
    assert_eq!(roots.fetcher().provider().methods(), ["eth_getBlockByHash"]);
}

#[tokio::test]
async fn block_and_proofs_are_fetched_concurrently() {
    // the block and the five proofs must all be in flight for the barrier to open
    let fixtures = Fixtures::load().with_barrier(6);
    let block_hash = fixtures.block_hash();
    let roots = StorageRoots::new(ChainFetcher::new(fixtures), StorageRootsConfig::default());

    let bundle = time::timeout(
        Duration::from_secs(5),
        roots.build_proof_bundle(block_hash),
    )
    .await
    .expect("requests were serialized")
    .unwrap();

    assert_eq!(bundle.block_hash, block_hash);
}

#[tokio::test]
async fn failures_are_captured_and_flushed() {
    let fixtures = Fixtures::load();
    let roots = StorageRoots::new(ChainFetcher::new(fixtures), StorageRootsConfig::default());
    let reporter = CountingReporter::default();
    let timeout = Duration::from_millis(10);

    let unknown = B256::repeat_byte(0xee).to_string();
    let response = handle(&roots, &reporter, Some(&unknown), timeout).await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "error": true, "message": format!("block {unknown} not found") })
    );

    let response = handle(&roots, &reporter, None, timeout).await;

    assert!(!response.is_ok());
    assert_eq!(reporter.captured.lock().unwrap().len(), 2);
    assert_eq!(reporter.flushes.load(Ordering::SeqCst), 2);

    // malformed hashes never reach the provider
    let response = handle(&roots, &reporter, Some("0x1234"), timeout).await;

    assert!(!response.is_ok());
    assert_eq!(roots.fetcher().provider().methods(), ["eth_getBlockByHash"]);
}

#[tokio::test]
async fn invalid_targets_fail_before_any_proof() {
    let fixtures = Fixtures::load();
    let block_hash = fixtures.block_hash();

    let mut config = StorageRootsConfig::default();
    config.accounts[1] = AccountTarget::new(
        "broken",
        "0xA700b4eB416Be35b2911fd5Dee80678ff64fF6C9",
        vec![SlotSource::fixed("0xzz")],
    );

    let roots = StorageRoots::new(ChainFetcher::new(fixtures), config);

    assert!(matches!(
        roots.build_proof_bundle(block_hash).await,
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(roots.fetcher().provider().methods(), ["eth_getBlockByHash"]);
}

#[tokio::test]
async fn failing_proof_aborts_the_bundle() {
    let fixtures = Fixtures::load().failing_proof(A_AAVE);
    let block_hash = fixtures.block_hash();
    let roots = StorageRoots::new(ChainFetcher::new(fixtures), StorageRootsConfig::default());

    match roots.build_proof_bundle(block_hash).await {
        Err(Error::UpstreamFetchFailed {
            method: "eth_getProof",
            source,
        }) => assert_eq!(source.to_string(), "connection reset by peer"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn missing_exchange_rate_proof_aborts_the_bundle() {
    let fixtures = Fixtures::load().without_storage_proof(STK_AAVE);
    let block_hash = fixtures.block_hash();
    let roots = StorageRoots::new(ChainFetcher::new(fixtures), StorageRootsConfig::default());

    match roots.build_proof_bundle(block_hash).await {
        Err(e @ Error::UpstreamFetchFailed {
            method: "eth_getProof",
            ..
        }) => assert!(e.to_string().contains("no storage proof for slot 0x51"), "{e}"),
        other => panic!("unexpected result: {other:?}"),
    }

    // the same failure reaches the caller as a failed response
    let reporter = CountingReporter::default();
    let response = handle(
        &roots,
        &reporter,
        Some(&block_hash.to_string()),
        Duration::from_millis(10),
    )
    .await;

    assert!(!response.is_ok());
    assert_eq!(reporter.captured.lock().unwrap().len(), 1);
    assert_eq!(reporter.flushes.load(Ordering::SeqCst), 1);
}

#[test]
fn post_shanghai_fields_are_ignored() {
    let shanghai: Value = serde_json::from_str(BLOCK).unwrap();

    let mut cancun = shanghai.clone();
    cancun["blobGasUsed"] = json!("0x40000");
    cancun["excessBlobGas"] = json!("0x0");
    cancun["parentBeaconBlockRoot"] = json!(B256::repeat_byte(0xbe));

    let shanghai: RawBlock = serde_json::from_value(shanghai).unwrap();
    let cancun: RawBlock = serde_json::from_value(cancun).unwrap();

    assert_eq!(
        prepare_block_rlp(&cancun).unwrap(),
        prepare_block_rlp(&shanghai).unwrap()
    );
}
