use std::{sync::Arc, time::Duration};

use poem::web::Data;
use poem_openapi::{param::Query, payload::Json, ApiResponse, OpenApi};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use storage_roots::{ChainFetcher, StorageRoots, StorageRootsConfig};

use crate::{provider::HttpProvider, reporter::ErrorReporter};

pub struct Api;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON-RPC endpoint of an archive node.
    pub rpc: String,

    /// Upper bound, in milliseconds, of an error report flush.
    pub flush_timeout: u64,

    pub targets: StorageRootsConfig,
}

impl Config {
    pub fn new(rpc: String, flush_timeout: u64) -> Self {
        Self {
            rpc,
            flush_timeout,
            targets: StorageRootsConfig::default(),
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout)
    }

    /// A proof bundle builder backed by a fresh connection to the node.
    pub fn storage_roots(&self) -> StorageRoots<HttpProvider> {
        let provider = HttpProvider::new(&self.rpc);

        StorageRoots::new(ChainFetcher::new(provider), self.targets.clone())
    }
}

#[derive(ApiResponse)]
pub enum StorageRootsReply {
    /// ABI encoded proof bundle.
    #[oai(status = 200)]
    Ok(Json<Value>),

    /// The bundle could not be built.
    #[oai(status = 500)]
    Failed(Json<Value>),
}

#[OpenApi]
impl Api {
    /// Storage proofs of the governance voting contracts at the provided block.
    #[oai(path = "/storage-roots", method = "get")]
    pub async fn storage_roots(
        &self,
        config: Data<&Config>,
        reporter: Data<&Arc<ErrorReporter>>,
        blockhash: Query<Option<String>>,
    ) -> poem::Result<StorageRootsReply> {
        let roots = config.storage_roots();
        let response = storage_roots::handle(
            &roots,
            reporter.0.as_ref(),
            blockhash.0.as_deref(),
            config.flush_timeout(),
        )
        .await;

        let ok = response.is_ok();
        let body = serde_json::to_value(&response).map_err(poem::error::InternalServerError)?;

        Ok(if ok {
            StorageRootsReply::Ok(Json(body))
        } else {
            StorageRootsReply::Failed(Json(body))
        })
    }

    /// Monitored contracts and slots.
    #[oai(path = "/targets", method = "get")]
    pub async fn targets(&self, config: Data<&Config>) -> poem::Result<Json<Value>> {
        Ok(Json(json!(config.targets)))
    }
}

#[cfg(test)]
fn test_app(rpc: String) -> impl poem::Endpoint {
    crate::app("127.0.0.1:0", Config::new(rpc, 50), Arc::new(ErrorReporter::new(None)))
}

#[tokio::test]
async fn targets_lists_the_monitored_contracts() {
    let cli = poem::test::TestClient::new(test_app("http://127.0.0.1:1".into()));
    let resp = cli.get("/api/targets").send().await;

    resp.assert_status_is_ok();

    let targets: StorageRootsConfig = resp.json().await.value().deserialize();

    assert_eq!(targets, StorageRootsConfig::default());
}

#[tokio::test]
async fn missing_blockhash_is_a_failure() {
    let cli = poem::test::TestClient::new(test_app("http://127.0.0.1:1".into()));
    let resp = cli.get("/api/storage-roots").send().await;

    resp.assert_status(poem::http::StatusCode::INTERNAL_SERVER_ERROR);
    resp.assert_json(json!({
        "error": true,
        "message": "invalid argument: missing `blockhash` parameter"
    }))
    .await;
}

#[tokio::test]
async fn unreachable_node_is_a_failure() {
    let cli = poem::test::TestClient::new(test_app("http://127.0.0.1:1".into()));
    let resp = cli
        .get("/api/storage-roots")
        .query(
            "blockhash",
            &"0x8bac7f1a6ed2325a0998f21bd56ca812fbf2e15cbe105bccdf4d4d81177ce984",
        )
        .send()
        .await;

    resp.assert_status(poem::http::StatusCode::INTERNAL_SERVER_ERROR);

    let body = resp.json().await;
    let body = body.value().object();

    body.get("error").assert_bool(true);
    assert!(body
        .get("message")
        .string()
        .starts_with("upstream `eth_getBlockByHash` call failed"));
}

#[cfg(test)]
#[poem::handler]
fn archive_node(poem::web::Json(body): poem::web::Json<Value>) -> poem::web::Json<Value> {
    let block: Value = serde_json::from_str(include_str!("../../../assets/block.json")).unwrap();
    let proofs: Value = serde_json::from_str(include_str!("../../../assets/proofs.json")).unwrap();

    let params = &body["params"];
    let result = match body["method"].as_str() {
        Some("eth_getBlockByHash") if params[0] == block["hash"] => {
            json!({ "hash": block["hash"], "number": block["number"] })
        }
        Some("eth_getBlockByNumber") if params[0] == block["number"] => block,
        Some("eth_getProof") => {
            let address = params[0].as_str().unwrap().to_lowercase();
            let mut proof = proofs[&address].clone();

            // single key requests get the last fixture proof, the stkAAVE exchange rate
            if params[1].as_array().unwrap().len() == 1 {
                let storage = proof["storageProof"].as_array().unwrap();
                let rate = storage.last().cloned().unwrap();

                proof["storageProof"] = json!([rate]);
            }

            proof
        }
        _ => Value::Null,
    };

    poem::web::Json(json!({ "jsonrpc": "2.0", "id": body["id"], "result": result }))
}

#[tokio::test]
async fn storage_roots_serves_the_bundle() {
    let rpc = crate::spawn_mock(archive_node).await;
    let cli = poem::test::TestClient::new(test_app(rpc));

    let resp = cli
        .get("/api/storage-roots")
        .query(
            "blockhash",
            &"0x8BAC7F1A6ED2325A0998F21BD56CA812FBF2E15CBE105BCCDF4D4D81177CE984",
        )
        .send()
        .await;

    resp.assert_status_is_ok();

    let body: Value = resp.json().await.value().deserialize();
    let data = body["data"].as_str().unwrap().strip_prefix("0x").unwrap();

    // head of eight words starting with the block hash
    assert!(data.len() > 8 * 64);
    assert_eq!(
        &data[..64],
        "8bac7f1a6ed2325a0998f21bd56ca812fbf2e15cbe105bccdf4d4d81177ce984"
    );
    assert_eq!(&data[6 * 64..7 * 64], format!("{:0>64}", "51"));
}
