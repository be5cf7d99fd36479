//! Local disk backend for `file://` URLs

use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

/// Reads and writes files on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }

    fn path(url: &Url) -> StorageResult<PathBuf> {
        url.to_file_path()
            .map_err(|_| StorageError::InvalidPath(url.to_string()))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn read(&self, url: &Url) -> StorageResult<Bytes> {
        let path = Self::path(url)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::io(url, e))?;
        Ok(Bytes::from(data))
    }

    async fn read_range(&self, url: &Url, offset: u64, length: u64) -> StorageResult<Bytes> {
        let path = Self::path(url)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StorageError::io(url, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| StorageError::io(url, e))?;

        // A range past the end of the file returns whatever is there
        let mut buf = Vec::with_capacity(length as usize);
        file.take(length)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io(url, e))?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, url: &Url, data: Bytes) -> StorageResult<()> {
        let path = Self::path(url)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(url, e))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| StorageError::io(url, e))
    }
}
