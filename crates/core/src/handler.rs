use core::{future::Future, str::FromStr as _, time::Duration};

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::{Error, Provider, Result, StorageRoots};

/// Error tracking backend.
pub trait Reporter: Send + Sync {
    /// Records the error; delivery may be deferred until [Reporter::flush].
    fn capture(&self, error: &Error);

    /// Delivers the captured errors, waiting at most `timeout`.
    ///
    /// Returns `false` if the buffer could not be drained in time.
    fn flush(&self, timeout: Duration) -> impl Future<Output = bool> + Send;
}

/// Body of a storage roots response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StorageRootsResponse {
    /// ABI encoded [crate::ProofBundle].
    Ok { data: Bytes },

    Failed { error: bool, message: String },
}

impl StorageRootsResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            error: true,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Parses a block hash regardless of the case of its hex digits.
pub fn parse_block_hash(block_hash: &str) -> Result<B256> {
    let normalized = block_hash.trim().to_lowercase();

    if !normalized.starts_with("0x") {
        return Err(Error::invalid_argument(format!(
            "block hash `{block_hash}` must be 0x prefixed"
        )));
    }

    B256::from_str(&normalized)
        .map_err(|e| Error::invalid_argument(format!("invalid block hash `{block_hash}`: {e}")))
}

/// Serves a storage roots request.
///
/// Errors never escape: they are captured by the reporter, which is flushed before the
/// failure response is returned.
pub async fn handle<P, R>(
    roots: &StorageRoots<P>,
    reporter: &R,
    block_hash: Option<&str>,
    flush_timeout: Duration,
) -> StorageRootsResponse
where
    P: Provider,
    R: Reporter,
{
    let block_hash = block_hash
        .ok_or_else(|| Error::invalid_argument("missing `blockhash` parameter"))
        .and_then(parse_block_hash);

    let result = match block_hash {
        Ok(hash) => roots.build_proof_bundle(hash).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(bundle) => {
            tracing::info!("proof bundle built for block {}", bundle.block_hash);

            StorageRootsResponse::Ok {
                data: bundle.abi_encode(),
            }
        }
        Err(e) => {
            tracing::error!("error building the proof bundle: {e}");

            reporter.capture(&e);

            if !reporter.flush(flush_timeout).await {
                tracing::warn!("error report not delivered within {flush_timeout:?}");
            }

            StorageRootsResponse::failed(e.to_string())
        }
    }
}

#[test]
fn parse_block_hash_is_case_insensitive() {
    let lower = "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6";
    let upper = "0x88E96D4537BEA4D9C05D12549907B32561D3BF31F45AAE734CDC119F13406CB6";

    let hash = parse_block_hash(upper).unwrap();

    assert_eq!(hash, parse_block_hash(lower).unwrap());
    assert_eq!(hash.to_string(), lower);
    assert_eq!(parse_block_hash(&format!(" {upper} ")).unwrap(), hash);
}

#[test]
fn parse_block_hash_rejects_malformed_hashes() {
    for hash in [
        "",
        "0x",
        "88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6",
        "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406c",
        "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cbz",
    ] {
        assert!(
            matches!(parse_block_hash(hash), Err(Error::InvalidArgument(_))),
            "`{hash}` should be rejected"
        );
    }
}

#[test]
fn response_json_shape() {
    let ok = StorageRootsResponse::Ok {
        data: Bytes::from_static(&[0xde, 0xad]),
    };
    let failed = StorageRootsResponse::failed("block 0x00 not found");

    assert_eq!(
        serde_json::to_value(&ok).unwrap(),
        serde_json::json!({ "data": "0xdead" })
    );
    assert_eq!(
        serde_json::to_value(&failed).unwrap(),
        serde_json::json!({ "error": true, "message": "block 0x00 not found" })
    );
    assert!(ok.is_ok());
    assert!(!failed.is_ok());
}
