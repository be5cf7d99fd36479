//! Storage module for reading and writing documents
//!
//! This module turns URLs into bytes, including:
//! - The `Storage` trait implemented by every backend
//! - A local disk backend for `file://` URLs
//! - An HTTP backend for `http://` and `https://` URLs
//! - An in-memory backend for prepared catalogs and tests
//! - A registry that dispatches a URL to the backend registered for its prefix

mod fs;
mod http;
mod memory;
mod traits;

pub use fs::FsStorage;
pub use http::{build_http_client, HttpStorage};
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::UserAgentConfig;
use bytes::Bytes;
use std::sync::Arc;
use url::Url;

/// Maps URL prefixes to storage backends
///
/// Built once at startup and shared by reference with the cache and the
/// crawler. A URL is served by the backend with the longest registered
/// prefix it starts with, so a specific bucket (`s3://public-bucket`) can use
/// different credentials than the scheme as a whole (`s3://`).
#[derive(Clone, Default)]
pub struct StorageRegistry {
    backends: Vec<(String, Arc<dyn Storage>)>,
}

impl StorageRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry serving `file://`, `http://` and `https://`
    pub fn with_defaults(user_agent: &UserAgentConfig) -> StorageResult<Self> {
        let http: Arc<dyn Storage> = Arc::new(HttpStorage::from_config(user_agent)?);
        let mut registry = Self::new();
        registry.register("file://", Arc::new(FsStorage::new()));
        registry.register("http://", Arc::clone(&http));
        registry.register("https://", http);
        Ok(registry)
    }

    /// Registers `storage` for every URL starting with `prefix`
    ///
    /// Registering the same prefix again replaces the earlier backend.
    pub fn register(&mut self, prefix: impl Into<String>, storage: Arc<dyn Storage>) {
        let prefix = prefix.into();
        self.backends.retain(|(existing, _)| *existing != prefix);
        self.backends.push((prefix, storage));
    }

    /// Finds the backend responsible for `url`
    pub fn resolve(&self, url: &Url) -> StorageResult<&Arc<dyn Storage>> {
        let href = url.as_str();
        self.backends
            .iter()
            .filter(|(prefix, _)| href.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, storage)| storage)
            .ok_or_else(|| StorageError::UnsupportedScheme(url.to_string()))
    }

    pub async fn read(&self, url: &Url) -> StorageResult<Bytes> {
        self.resolve(url)?.read(url).await
    }

    pub async fn read_range(&self, url: &Url, offset: u64, length: u64) -> StorageResult<Bytes> {
        self.resolve(url)?.read_range(url, offset, length).await
    }

    pub async fn write(&self, url: &Url, data: Bytes) -> StorageResult<()> {
        self.resolve(url)?.write(url, data).await
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field(
                "prefixes",
                &self.backends.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            )
            .finish()
    }
}
