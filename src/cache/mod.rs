//! Read-through disk cache for STAC documents and byte ranges
//!
//! Every document the crawler touches goes through [`Cache::read_document`].
//! A hit is served from the cache directory. A miss is read from the storage
//! registry, annotated, written back and returned. Fetch and parse failures do
//! not surface as errors: they are replaced by a [`FetchError`] document,
//! which is cached like any other so the failure is not retried until its
//! entry is removed.

mod key;

pub use key::{document_key, range_key};

use crate::stac::{Document, FetchError};
use crate::storage::{StorageRegistry, StorageResult};
use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// A request for `length` bytes of `url` starting at `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub url: Url,
    pub offset: u64,
    pub length: u64,
}

impl RangeRequest {
    pub fn new(url: Url, offset: u64, length: u64) -> Self {
        Self {
            url,
            offset,
            length,
        }
    }
}

/// Cache rooted at a single directory
#[derive(Debug)]
pub struct Cache {
    directory: PathBuf,
    storage: Arc<StorageRegistry>,
    directory_ready: AtomicBool,
}

impl Cache {
    /// Creates a cache in `directory`, reading misses through `storage`
    ///
    /// The directory is created on the first write, not here.
    pub fn new(directory: impl Into<PathBuf>, storage: Arc<StorageRegistry>) -> Self {
        Self {
            directory: directory.into(),
            storage,
            directory_ready: AtomicBool::new(false),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Storage registry used for misses
    pub fn storage(&self) -> &Arc<StorageRegistry> {
        &self.storage
    }

    /// Path of the cache entry for the document at `url`
    pub fn document_path(&self, url: &Url) -> PathBuf {
        self.directory.join(document_key(url))
    }

    /// Reads the document at `url`, from cache when possible
    ///
    /// Never fails: an address that cannot be read or parsed yields a
    /// [`Document::Error`] carrying the reason.
    pub async fn read_document(&self, url: &Url) -> Document {
        let path = self.document_path(url);

        if let Some(bytes) = read_entry(&path).await {
            match Document::from_slice(&bytes) {
                Ok(doc) => {
                    tracing::trace!("Cache hit: {}", url);
                    return doc;
                }
                Err(e) => {
                    tracing::warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                }
            }
        }

        tracing::debug!("Fetching: {}", url);
        let doc = match self.fetch_document(url).await {
            Ok(mut doc) => {
                if let Document::Stac(stac) = &mut doc {
                    stac.annotate(url, Utc::now());
                }
                doc
            }
            Err(message) => {
                tracing::warn!("Failed to load {}: {}", url, message);
                Document::Error(FetchError::new(url, message))
            }
        };

        match doc.to_vec() {
            Ok(bytes) => self.write_entry(&path, &bytes).await,
            Err(e) => tracing::warn!("Failed to serialize {}: {}", url, e),
        }

        doc
    }

    async fn fetch_document(&self, url: &Url) -> Result<Document, String> {
        let bytes = self.storage.read(url).await.map_err(|e| e.to_string())?;
        Document::from_slice(&bytes).map_err(|e| format!("Invalid STAC document: {}", e))
    }

    /// Returns the cached bytes of `request`, calling `next` on a miss
    ///
    /// `next` is only invoked when no entry exists. Its result is stored
    /// before being returned; its errors are returned and nothing is stored.
    pub async fn read_range<F, Fut>(&self, request: &RangeRequest, next: F) -> StorageResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<Bytes>>,
    {
        let path = self
            .directory
            .join(range_key(&request.url, request.offset, request.length));

        if let Some(bytes) = read_entry(&path).await {
            tracing::trace!(
                "Range cache hit: {} @ {}+{}",
                request.url,
                request.offset,
                request.length
            );
            return Ok(Bytes::from(bytes));
        }

        let bytes = next().await?;
        self.write_entry(&path, &bytes).await;
        Ok(bytes)
    }

    /// [`read_range`](Self::read_range) with misses served by the storage registry
    pub async fn read_range_from_storage(&self, request: &RangeRequest) -> StorageResult<Bytes> {
        self.read_range(request, || {
            self.storage
                .read_range(&request.url, request.offset, request.length)
        })
        .await
    }

    async fn ensure_directory(&self) -> std::io::Result<()> {
        if self.directory_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.directory).await?;
        self.directory_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Persists an entry; failures only cost a future refetch, so they are logged
    async fn write_entry(&self, path: &Path, bytes: &[u8]) {
        if let Err(e) = self.ensure_directory().await {
            tracing::warn!(
                "Failed to create cache directory {}: {}",
                self.directory.display(),
                e
            );
            return;
        }
        if let Err(e) = tokio::fs::write(path, bytes).await {
            tracing::warn!("Failed to write cache entry {}: {}", path.display(), e);
        }
    }
}

async fn read_entry(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Failed to read cache entry {}: {}", path.display(), e);
            None
        }
    }
}
