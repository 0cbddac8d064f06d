//! Remote byte sources for the download cache.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use pressbox_shared::{PressboxError, PressboxResult};

/// Response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, PressboxResult<Vec<u8>>>;

/// Opens a remote resource for streaming.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Start the transfer. Non-success statuses fail here.
    async fn open(&self, url: &str) -> PressboxResult<ByteStream>;
}

/// Fetcher over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> PressboxResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pressbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PressboxError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn open(&self, url: &str) -> PressboxResult<ByteStream> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PressboxError::Download(format!("{}: {}", url, e)))?;

        tracing::debug!(
            url,
            status = response.status().as_u16(),
            content_length = response.content_length(),
            "Download started"
        );

        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| PressboxError::Download(format!("{}: {}", url, e)))
            })
            .boxed())
    }
}
