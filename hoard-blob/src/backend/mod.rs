//! Blob backends: where file bytes physically live.
//!
//! Every backend implements [`BlobBackend`]. What differs between them is
//! captured by [`BackendCapabilities`]: whether partial reads are native and
//! how large a single stored object may be. Callers consult the capability
//! set instead of matching on concrete types.

mod bucket;
mod memory;
mod relay;

pub use bucket::{BucketBackend, BucketConfig};
pub use memory::MemoryBackend;
pub use relay::{RelayBackend, RelayConfig, RelayObjectRef, UploadStrategy, DEFAULT_RELAY_MAX_OBJECT_BYTES};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BlobError, BlobResult, FileType};

/// Blob storage operations implemented by every backend
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Store one object; returns the backend's reference to it
    async fn put(&self, object: &ObjectPut, data: Bytes) -> BlobResult<String>;

    /// Read a whole object
    async fn get(&self, remote_id: &str) -> BlobResult<Bytes>;

    /// Read `len` bytes starting at `offset`; only called when `supports_range` is set
    async fn get_range(&self, remote_id: &str, offset: u64, len: u64) -> BlobResult<Bytes> {
        let _ = (remote_id, offset, len);
        Err(BlobError::Unsupported)
    }

    async fn delete(&self, remote_id: &str) -> BlobResult<()>;
}

/// What a backend can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supports_range: bool,
    /// Hard ceiling for one stored object, if any
    pub max_object_size: Option<u64>,
}

impl BackendCapabilities {
    pub fn basic() -> Self {
        Self {
            supports_range: false,
            max_object_size: None,
        }
    }

    pub fn with_range(mut self) -> Self {
        self.supports_range = true;
        self
    }

    pub fn with_max_object_size(mut self, bytes: u64) -> Self {
        self.max_object_size = Some(bytes);
        self
    }

    /// Reject `size` when it exceeds the object ceiling.
    pub fn check_size(&self, size: u64) -> BlobResult<()> {
        match self.max_object_size {
            Some(max) if size > max => Err(BlobError::SizeLimitExceeded { size, max }),
            _ => Ok(()),
        }
    }
}

/// Description of an object about to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPut {
    /// Deterministic name derived from the storage key (and part index)
    pub object_name: String,
    /// Original file name, for backends that surface it
    pub file_name: String,
    pub file_type: FileType,
    pub content_type: Option<String>,
    /// `true` for one part of a chunked file
    pub is_part: bool,
}

impl ObjectPut {
    pub fn whole(object_name: impl Into<String>, file_name: impl Into<String>, file_type: FileType) -> Self {
        Self {
            object_name: object_name.into(),
            file_name: file_name.into(),
            file_type,
            content_type: None,
            is_part: false,
        }
    }

    pub fn part(key: &str, index: u32, file_name: &str, file_type: FileType) -> Self {
        Self {
            object_name: format!("{key}/part-{index:06}"),
            file_name: format!("{file_name}.part{index}"),
            file_type,
            content_type: Some("application/octet-stream".to_string()),
            is_part: true,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}
