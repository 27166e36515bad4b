//! JSON-RPC over HTTP against any EVM compatible node.
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    json_codecs::{i128_from_hex_str, parse_hex_quantity, to_hex_quantity, u128_from_hex_str},
    performance::TimedExt,
};

use super::{
    make_http_client, parse_endpoint, BlockHeight, ClientOptions, FetchError, LedgerSource,
    UnixTimestamp,
};

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

const JSONRPC_VERSION: &str = "2.0";

// Both shapes require `jsonrpc` so a body that is neither is rejected instead of read as null.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcMessage {
    Error { jsonrpc: String, error: RpcError },
    Result { jsonrpc: String, result: Value },
}

impl RpcMessage {
    fn version(&self) -> &str {
        match self {
            RpcMessage::Error { jsonrpc, .. } => jsonrpc,
            RpcMessage::Result { jsonrpc, .. } => jsonrpc,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvmBlockHeader {
    #[serde(deserialize_with = "u128_from_hex_str")]
    number: BlockHeight,
    #[serde(deserialize_with = "i128_from_hex_str")]
    timestamp: UnixTimestamp,
}

pub struct EvmRpcSource {
    client: reqwest::Client,
    url: reqwest::Url,
    next_id: AtomicU64,
}

impl EvmRpcSource {
    pub fn new(endpoint: &str, options: &ClientOptions) -> Result<Self, FetchError> {
        Ok(Self {
            client: make_http_client(options)?,
            url: parse_endpoint(endpoint)?,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params
        });

        let res = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .timed(method)
            .await?;

        let status = res.status();
        if status.is_server_error() {
            return Err(FetchError::Connectivity(format!(
                "{method} answered with status {status}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Protocol(format!(
                "{method} answered with status {status}"
            )));
        }

        let message = res.json::<RpcMessage>().await.map_err(|err| {
            if err.is_decode() {
                FetchError::Protocol(format!(
                    "{method} returned a malformed response: {:#}",
                    anyhow::Error::from(err.without_url())
                ))
            } else {
                err.into()
            }
        })?;

        if message.version() != JSONRPC_VERSION {
            return Err(FetchError::Protocol(format!(
                "{method} answered with jsonrpc version {}",
                message.version()
            )));
        }

        match message {
            RpcMessage::Result { result, .. } => Ok(result),
            RpcMessage::Error { error, .. } => Err(FetchError::Protocol(format!(
                "{method} failed, code = {} message = {}",
                error.code, error.message
            ))),
        }
    }

    async fn get_block_header(&self, block: &str) -> Result<Option<EvmBlockHeader>, FetchError> {
        let value = self
            .call("eth_getBlockByNumber", json!([block, false]))
            .await?;

        serde_json::from_value::<Option<EvmBlockHeader>>(value).map_err(|err| {
            FetchError::Protocol(format!("failed to decode block {block}: {err}"))
        })
    }
}

#[async_trait]
impl LedgerSource for EvmRpcSource {
    async fn check_connectivity(&self) -> Result<(), FetchError> {
        match self.get_block_header("latest").await? {
            Some(header) => {
                debug!(
                    number = %header.number,
                    timestamp = %header.timestamp,
                    "node answered with latest block"
                );
                Ok(())
            }
            None => Err(FetchError::Protocol(
                "node returned no latest block".to_string(),
            )),
        }
    }

    async fn get_head_height(&self) -> Result<BlockHeight, FetchError> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        let hex = serde_json::from_value::<String>(value).map_err(|err| {
            FetchError::Protocol(format!("eth_blockNumber result is not a string: {err}"))
        })?;

        parse_hex_quantity(&hex).map_err(|err| FetchError::Protocol(err.to_string()))
    }

    async fn get_block_timestamp(&self, height: BlockHeight) -> Result<UnixTimestamp, FetchError> {
        self.get_block_header(&to_hex_quantity(height))
            .await?
            .map(|header| header.timestamp)
            .ok_or(FetchError::NotFound(height))
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    fn rpc_result(result: Value) -> String {
        json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
    }

    #[tokio::test]
    async fn get_head_height_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_blockNumber" })))
            .with_status(200)
            .with_body(rpc_result(json!("0x121eac0")))
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert_eq!(source.get_head_height().await, Ok(19_000_000));
    }

    #[tokio::test]
    async fn get_head_height_beyond_u64_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result(json!("0x10000000000000000")))
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert_eq!(
            source.get_head_height().await,
            Ok(u64::MAX as BlockHeight + 1)
        );
    }

    #[tokio::test]
    async fn get_block_timestamp_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getBlockByNumber",
                "params": ["0x5", false]
            })))
            .with_status(200)
            .with_body(rpc_result(json!({
                "number": "0x5",
                "hash": "0xabc",
                "timestamp": "0x665a6480"
            })))
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert_eq!(source.get_block_timestamp(5).await, Ok(1_717_200_000));
    }

    #[tokio::test]
    async fn get_missing_block_timestamp_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result(Value::Null))
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert_eq!(
            source.get_block_timestamp(999_999_999).await,
            Err(FetchError::NotFound(999_999_999))
        );
    }

    #[tokio::test]
    async fn rpc_error_is_protocol_error_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32601, "message": "method not found" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        let err = source.get_head_height().await.unwrap_err();
        assert!(
            matches!(&err, FetchError::Protocol(message) if message.contains("method not found")),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body("<html>rate limited</html>")
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert!(matches!(
            source.get_head_height().await,
            Err(FetchError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn unknown_jsonrpc_version_is_protocol_error_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({ "jsonrpc": "1.0", "id": 1, "result": "0x10" }).to_string())
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert_eq!(
            source.get_head_height().await,
            Err(FetchError::Protocol(
                "eth_blockNumber answered with jsonrpc version 1.0".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn bad_timestamp_is_protocol_error_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result(json!({ "number": "0x5", "timestamp": "soon" })))
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert!(matches!(
            source.get_block_timestamp(5).await,
            Err(FetchError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn server_error_is_connectivity_error_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert!(matches!(
            source.get_head_height().await,
            Err(FetchError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_connectivity_error_test() {
        let source = EvmRpcSource::new("http://127.0.0.1:1", &ClientOptions::default()).unwrap();
        assert!(matches!(
            source.get_head_height().await,
            Err(FetchError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn check_connectivity_test() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getBlockByNumber",
                "params": ["latest", false]
            })))
            .with_status(200)
            .with_body(rpc_result(json!({ "number": "0x10", "timestamp": "0x665a6480" })))
            .create_async()
            .await;

        let source = EvmRpcSource::new(&server.url(), &ClientOptions::default()).unwrap();
        assert_eq!(source.check_connectivity().await, Ok(()));
    }

    #[test]
    fn missing_endpoint_test() {
        assert!(matches!(
            EvmRpcSource::new("", &ClientOptions::default()),
            Err(FetchError::Connectivity(_))
        ));
    }
}
