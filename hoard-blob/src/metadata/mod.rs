//! Key/value metadata stores.
//!
//! A store maps a key to an opaque value plus optional structured metadata,
//! with an optional per-key TTL and prefix listing. There are no multi-key
//! transactions: every update is a read-modify-write of one key.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryMetadataStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisMetadataStore;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BlobResult, ChunkDescriptor, FileMetadata};

/// Key/value store with TTL and cursor-paginated prefix listing
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a live (non-expired) entry
    async fn get(&self, key: &str) -> BlobResult<Option<MetadataEntry>>;

    /// Write an entry, replacing any previous value and TTL
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        metadata: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> BlobResult<()>;

    /// Remove an entry; missing keys are not an error
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// List keys starting with `prefix`, resuming after `cursor`
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> BlobResult<ListPage>;
}

/// One stored entry: the opaque value and its structured sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub value: Bytes,
    pub metadata: Option<serde_json::Value>,
}

impl MetadataEntry {
    pub fn new(value: Bytes, metadata: Option<serde_json::Value>) -> Self {
        Self { value, metadata }
    }

    /// Decode the sidecar as [`FileMetadata`].
    pub fn file_metadata(&self) -> BlobResult<Option<FileMetadata>> {
        match &self.metadata {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Decode the value as a chunk descriptor list; an empty value is an empty list.
    pub fn descriptors(&self) -> BlobResult<Vec<ChunkDescriptor>> {
        if self.value.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&self.value)?)
    }

    /// The value as UTF-8 text (a single-object remote reference).
    pub fn value_str(&self) -> BlobResult<&str> {
        std::str::from_utf8(&self.value)
            .map_err(|_| crate::BlobError::invalid("stored value is not valid UTF-8"))
    }
}

/// A page of keys from [`MetadataStore::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass back to continue; `None` once exhausted
    pub cursor: Option<String>,
}
