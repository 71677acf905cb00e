use reqwest::Client;
use serde_json::{json, Value};
use storage_roots::Provider;

/// JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    url: String,
}

impl HttpProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

impl Provider for HttpProvider {
    async fn request(&self, method: &'static str, params: Value) -> anyhow::Result<Value> {
        let response: Value = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            anyhow::bail!("json-rpc error: {error}");
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("json-rpc response without result"))
    }
}

#[cfg(test)]
#[poem::handler]
fn echo(poem::web::Json(body): poem::web::Json<Value>) -> poem::web::Json<Value> {
    let result = match body["method"].as_str() {
        Some("eth_chainId") => json!({ "jsonrpc": "2.0", "id": body["id"], "result": "0x1" }),
        Some("eth_getBlockByHash") => json!({ "jsonrpc": "2.0", "id": body["id"], "result": null }),
        Some("eth_echo") => json!({ "jsonrpc": "2.0", "id": body["id"], "result": body["params"] }),
        Some("eth_empty") => json!({ "jsonrpc": "2.0", "id": body["id"] }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": body["id"],
            "error": { "code": -32601, "message": "the method does not exist" }
        }),
    };

    poem::web::Json(result)
}

#[tokio::test]
async fn http_provider_unwraps_results() {
    let url = crate::spawn_mock(echo).await;
    let provider = HttpProvider::new(url);

    assert_eq!(
        provider.request("eth_chainId", json!([])).await.unwrap(),
        "0x1"
    );
    assert_eq!(
        provider
            .request("eth_echo", json!(["0x51", false]))
            .await
            .unwrap(),
        json!(["0x51", false])
    );
    assert!(provider
        .request("eth_getBlockByHash", json!([]))
        .await
        .unwrap()
        .is_null());
}

#[tokio::test]
async fn http_provider_reports_rpc_errors() {
    let url = crate::spawn_mock(echo).await;
    let provider = HttpProvider::new(url);

    let err = provider
        .request("eth_getProof", json!([]))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("the method does not exist"), "{err}");

    let err = provider
        .request("eth_empty", json!([]))
        .await
        .unwrap_err()
        .to_string();

    assert_eq!(err, "json-rpc response without result");
}

#[tokio::test]
async fn unreachable_endpoint_fails() {
    let provider = HttpProvider::new("http://127.0.0.1:1");

    assert!(provider.request("eth_chainId", json!([])).await.is_err());
}
