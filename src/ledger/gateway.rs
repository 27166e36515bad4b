//! HTTP gateway of an immutable ledger, Arweave style. Heights and timestamps are plain JSON
//! integers here.
use async_trait::async_trait;
use format_url::FormatUrl;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};

use crate::performance::TimedExt;

use super::{
    make_http_client, parse_endpoint, BlockHeight, ClientOptions, FetchError, LedgerSource,
    UnixTimestamp,
};

#[derive(Debug, Deserialize)]
struct GatewayInfo {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct GatewayBlock {
    timestamp: i64,
}

pub struct GatewaySource {
    client: reqwest::Client,
    base_url: String,
}

impl GatewaySource {
    pub fn new(endpoint: &str, options: &ClientOptions) -> Result<Self, FetchError> {
        let url = parse_endpoint(endpoint)?;
        Ok(Self {
            client: make_http_client(options)?,
            base_url: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn make_info_url(&self) -> String {
        FormatUrl::new(&self.base_url)
            .with_path_template("/info")
            .format_url()
    }

    fn make_block_by_height_url(&self, height: u64) -> String {
        let height = height.to_string();
        FormatUrl::new(&self.base_url)
            .with_path_template("/block/height/:height")
            .with_substitutes(vec![("height", height.as_str())])
            .format_url()
    }

    /// GETs `url` and decodes the body, `Ok(None)` when the gateway does not know the resource.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        name: &str,
    ) -> Result<Option<T>, FetchError> {
        let res = self.client.get(url).send().timed(name).await?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => res.json::<T>().await.map(Some).map_err(|err| {
                if err.is_decode() {
                    FetchError::Protocol(format!(
                        "{name} returned a malformed response: {:#}",
                        anyhow::Error::from(err.without_url())
                    ))
                } else {
                    err.into()
                }
            }),
            status if status.is_server_error() => Err(FetchError::Connectivity(format!(
                "{name} answered with status {status}"
            ))),
            status => Err(FetchError::Protocol(format!(
                "{name} answered with status {status}"
            ))),
        }
    }
}

#[async_trait]
impl LedgerSource for GatewaySource {
    async fn check_connectivity(&self) -> Result<(), FetchError> {
        self.get_head_height().await.map(|_| ())
    }

    async fn get_head_height(&self) -> Result<BlockHeight, FetchError> {
        self.get_json::<GatewayInfo>(&self.make_info_url(), "get_info")
            .await?
            .map(|info| info.height.into())
            .ok_or_else(|| FetchError::Protocol("gateway has no info endpoint".to_string()))
    }

    async fn get_block_timestamp(&self, height: BlockHeight) -> Result<UnixTimestamp, FetchError> {
        let Ok(gateway_height) = u64::try_from(height) else {
            return Err(FetchError::NotFound(height));
        };

        self.get_json::<GatewayBlock>(
            &self.make_block_by_height_url(gateway_height),
            "get_block_by_height",
        )
        .await?
        .map(|block| block.timestamp.into())
        .ok_or(FetchError::NotFound(height))
    }
}
