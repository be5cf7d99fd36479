//! stac-spider: a concurrent crawler for STAC catalogs
//!
//! This crate walks a tree of linked STAC documents (catalogs, collections and
//! items) stored on local disk or behind HTTP, fetching every reachable
//! document exactly once through a read-through disk cache and handing each one
//! to subscribed consumers.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod operations;
pub mod stac;
pub mod storage;
pub mod url;

use std::sync::Arc;
use thiserror::Error;

/// Main error type for stac-spider operations
#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event handler failed for {url}: {message}")]
    Handler { url: String, message: String },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Crawl aborted after an earlier failure")]
    Aborted,

    #[error("Usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Shared(Arc<SpiderError>),
}

impl SpiderError {
    /// Builds a handler error for the document at `url`
    pub fn handler(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Handler {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Cannot build a file URL from path: {0}")]
    InvalidPath(String),

    #[error("URL cannot be a base for relative links: {0}")]
    CannotBeABase(String),
}

/// Result type alias for stac-spider operations
pub type Result<T> = std::result::Result<T, SpiderError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use cache::Cache;
pub use config::Config;
pub use crawler::{CrawlEvent, CrawlStats, EventKind, Flow, StacSpider};
pub use stac::{Document, DocumentKind, StacDocument, FETCH_ERROR_ID};
pub use storage::{Storage, StorageRegistry};
