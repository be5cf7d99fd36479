//! In-memory backend
//!
//! Holds objects in a map and records every read, which makes it useful for
//! embedding prepared catalogs and for asserting how often the crawler touched
//! each address.

use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Default)]
struct Inner {
    objects: Mutex<HashMap<String, Bytes>>,
    reads: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Storage backed by a shared in-memory map
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
    latency: Option<Duration>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every read by `latency`, so concurrent reads overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stores `data` under `url`
    pub fn insert(&self, url: &Url, data: impl Into<Bytes>) {
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert(url.to_string(), data.into());
    }

    /// Number of whole or ranged reads issued for `url`, including failed ones
    pub fn read_count(&self, url: &Url) -> usize {
        self.inner
            .reads
            .lock()
            .unwrap()
            .get(url.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Number of reads issued for any address
    pub fn total_reads(&self) -> usize {
        self.inner.reads.lock().unwrap().values().sum()
    }

    /// Highest number of reads that were in progress at the same time
    pub fn max_concurrent_reads(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    async fn fetch(&self, url: &Url) -> StorageResult<Bytes> {
        *self
            .inner
            .reads
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = self
            .inner
            .objects
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(url.to_string()));

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, url: &Url) -> StorageResult<Bytes> {
        self.fetch(url).await
    }

    async fn read_range(&self, url: &Url, offset: u64, length: u64) -> StorageResult<Bytes> {
        let data = self.fetch(url).await?;
        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(length) as usize).min(data.len());
        Ok(data.slice(start..end))
    }

    async fn write(&self, url: &Url, data: Bytes) -> StorageResult<()> {
        self.insert(url, data);
        Ok(())
    }
}
