//! # hoard-blob: storage abstraction for a personal media host
//!
//! `hoard-blob` turns size-limited, heterogeneous blob backends into one
//! contract:
//!
//! - **Whole-file uploads** stored as a single backend object
//! - **Chunked, resumable uploads** staged per chunk and persisted in the
//!   background, complete as soon as every index is present
//! - **Range-correct reads** over a virtual file assembled from independently
//!   stored chunks, fetching only the chunks a range touches
//! - **Trash lifecycle**: soft delete with TTL, restore, permanent delete and
//!   a reaper for blobs of expired trash entries
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use hoard_blob::prelude::*;
//! use hoard_blob::backend::MemoryBackend;
//! use hoard_blob::metadata::MemoryMetadataStore;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let adapter = StorageAdapter::new(
//!     Arc::new(MemoryMetadataStore::new()),
//!     Arc::new(MemoryBackend::new()),
//!     BlobConfig::default(),
//! );
//!
//! let key = adapter
//!     .upload_file(FileUpload::new("hello.txt", Bytes::from_static(b"Hello, world!")))
//!     .await?;
//!
//! let read = adapter.get(&key, Some("bytes=0-4")).await?;
//! assert_eq!(read.status, 206);
//! assert_eq!(read.content_range.as_deref(), Some("bytes 0-4/13"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        StorageAdapter        │  ← public contract
//! ├──────────────────────────────┤
//! │ ChunkIngest │ Lifecycle      │  ← staging + background push / trash
//! ├──────────────────────────────┤
//! │        ChunkAssembler        │  ← range planning over chunk sets
//! ├──────────────────────────────┤
//! │ MetadataStore │ BlobBackend  │  ← key/value + TTL / object bytes
//! └──────────────────────────────┘
//! ```

pub mod adapter;
pub mod assembler;
pub mod backend;
mod config;
mod context;
mod error;
pub mod factory;
pub mod ingest;
pub mod lifecycle;
mod locks;
pub mod metadata;
pub mod retry;
mod tasks;
mod types;

pub use adapter::{FileUpload, ListScope, MetadataView, ReadResponse, StorageAdapter};
pub use assembler::{ByteRange, ChunkAssembler, ChunkPlan, ChunkRead};
pub use backend::{BackendCapabilities, BlobBackend, ObjectPut};
pub use config::{BackendKind, BlobConfig};
pub use error::{BlobError, BlobResult};
pub use factory::AdapterFactory;
pub use ingest::ChunkIngest;
pub use lifecycle::{LifecycleManager, ReapLedger, TrashReaper};
pub use locks::{KeyGuard, KeyedLocks};
pub use metadata::{ListPage, MetadataEntry, MetadataStore};
pub use retry::RetryPolicy;
pub use tasks::TaskRunner;
pub use types::{
    ByteStream, ChunkAck, ChunkDescriptor, ChunkInfo, ChunkedInit, FileMetadata, FileType, MetadataPatch,
    StorageKey, UploadProgress, CHUNK_MARKER, REAP_PREFIX, STAGING_PREFIX, TRASH_PREFIX,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobConfig, BlobError, BlobResult, ByteStream, ChunkedInit, FileMetadata, FileType, FileUpload,
        StorageAdapter, StorageKey,
    };
}
