//! HTTP backend for `http://` and `https://` URLs
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Whole-object GET requests
//! - Ranged GET requests for partial reads
//! - Mapping non-success statuses to storage errors

use crate::config::UserAgentConfig;
use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use url::Url;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use stac_spider::config::UserAgentConfig;
/// use stac_spider::storage::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL)
    let user_agent = format!(
        "{}/{} (+{})",
        config.crawler_name, config.crawler_version, config.contact_url
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Reads documents over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
}

impl HttpStorage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a backend with a client configured from `config`
    pub fn from_config(config: &UserAgentConfig) -> StorageResult<Self> {
        Ok(Self::new(build_http_client(config)?))
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> StorageResult<Bytes> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn read(&self, url: &Url) -> StorageResult<Bytes> {
        tracing::trace!("GET {}", url);
        self.send(url, self.client.get(url.clone())).await
    }

    async fn read_range(&self, url: &Url, offset: u64, length: u64) -> StorageResult<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        tracing::trace!("GET {} ({})", url, range);
        self.send(url, self.client.get(url.clone()).header(RANGE, range))
            .await
    }

    async fn write(&self, url: &Url, _data: Bytes) -> StorageResult<()> {
        Err(StorageError::ReadOnly(url.to_string()))
    }
}
