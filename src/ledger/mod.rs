//! The capability every network family exposes to the locator: a head height and a timestamp for
//! any height below it. Adapters live in the submodules, one per family.
pub mod evm;
pub mod gateway;
#[cfg(test)]
pub mod test_utils;

use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

pub use evm::EvmRpcSource;
pub use gateway::GatewaySource;

// Some EVM chains report quantities that do not fit 64 bits, carry everything as 128 bits.
pub type BlockHeight = u128;

/// Unix epoch seconds.
pub type UnixTimestamp = i128;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("endpoint unreachable: {0}")]
    Connectivity(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("no block at height {0}")]
    NotFound(BlockHeight),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // Endpoint URLs often embed an API key, never let them reach the logs.
        let err = err.without_url();
        // reqwest hides the useful part in the source chain, render all of it.
        if err.is_decode() {
            FetchError::Protocol(format!("{:#}", anyhow::Error::from(err)))
        } else {
            FetchError::Connectivity(format!("{:#}", anyhow::Error::from(err)))
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Upper bound on a single request, connecting included.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) fn make_http_client(options: &ClientOptions) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(options.request_timeout)
        .build()
        .map_err(Into::into)
}

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<reqwest::Url, FetchError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(FetchError::Connectivity(
            "no endpoint configured".to_string(),
        ));
    }

    reqwest::Url::parse(endpoint)
        .map_err(|err| FetchError::Connectivity(format!("invalid endpoint url: {err}")))
}

#[automock]
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Cheap request confirming the endpoint answers before a search is started.
    async fn check_connectivity(&self) -> Result<(), FetchError>;
    async fn get_head_height(&self) -> Result<BlockHeight, FetchError>;
    async fn get_block_timestamp(&self, height: BlockHeight) -> Result<UnixTimestamp, FetchError>;
}
