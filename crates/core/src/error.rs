use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed slot, key or block hash.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("block {0} not found")]
    BlockNotFound(String),

    /// The provider call failed or returned a result that could not be read.
    #[error("upstream `{method}` call failed: {source:#}")]
    UpstreamFetchFailed {
        method: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("rlp codec error: {0}")]
    Codec(#[from] alloy_rlp::Error),

    /// Header fields of blocks before London/Shanghai are not supported.
    #[error("unsupported block {number}: missing `{field}`")]
    UnsupportedBlock { number: u64, field: &'static str },
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn upstream(method: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::UpstreamFetchFailed {
            method,
            source: source.into(),
        }
    }
}
