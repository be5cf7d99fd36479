//! Storage traits and error types
//!
//! This module defines the interface the crawler uses to turn an address into
//! bytes, independent of where those bytes live.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No storage registered for {0}")]
    UnsupportedScheme(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error for {url}: {source}")]
    Io {
        url: String,
        source: std::io::Error,
    },

    #[error("Not a local path: {0}")]
    InvalidPath(String),

    #[error("Writes are not supported for {0}")]
    ReadOnly(String),
}

impl StorageError {
    pub(crate) fn io(url: &Url, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(url.to_string())
        } else {
            Self::Io {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// A backend serves every URL whose prefix it was registered under in a
/// [`StorageRegistry`](crate::storage::StorageRegistry).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the whole object at `url`
    async fn read(&self, url: &Url) -> StorageResult<Bytes>;

    /// Reads `length` bytes starting at `offset`
    async fn read_range(&self, url: &Url, offset: u64, length: u64) -> StorageResult<Bytes>;

    /// Writes `data` to `url`, replacing anything already there
    async fn write(&self, url: &Url, data: Bytes) -> StorageResult<()>;
}
