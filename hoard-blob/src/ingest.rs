//! Chunked upload ingestion.
//!
//! A chunk is staged in the metadata store under a short TTL and
//! acknowledged at once. A background task then pushes it to the backend
//! and records its descriptor. Completion is the moment every index in
//! `0..total` has a descriptor; there is no finalize step.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::backend::ObjectPut;
use crate::context::StoreContext;
use crate::metadata::MetadataEntry;
use crate::{
    BlobError, BlobResult, ChunkAck, ChunkDescriptor, ChunkedInit, FileMetadata, StorageKey, UploadProgress,
};

/// Chunk ingestion pipeline
#[derive(Clone)]
pub struct ChunkIngest {
    ctx: Arc<StoreContext>,
}

impl ChunkIngest {
    pub(crate) fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Validate limits and register a new chunked upload.
    ///
    /// Every ceiling is checked before any store or backend I/O.
    #[instrument(skip(self, init), fields(file_type = %init.file_type, total = init.total_chunks))]
    pub async fn init(&self, init: ChunkedInit) -> BlobResult<StorageKey> {
        let config = &self.ctx.config;

        if init.file_name.trim().is_empty() {
            return Err(BlobError::invalid("fileName is required"));
        }
        if init.total_chunks == 0 {
            return Err(BlobError::invalid("totalChunks must be at least 1"));
        }
        if init.total_chunks > config.max_chunks {
            return Err(BlobError::invalid(format!(
                "totalChunks {} exceeds the limit of {}",
                init.total_chunks, config.max_chunks
            )));
        }
        if init.file_size > config.max_file_bytes {
            return Err(BlobError::SizeLimitExceeded {
                size: init.file_size,
                max: config.max_file_bytes,
            });
        }
        // Chunks that would average above the object cap cannot all fit
        let average_chunk = init.file_size.div_ceil(init.total_chunks as u64);
        self.ctx.backend.capabilities().check_size(average_chunk)?;

        let key = StorageKey::generate(init.file_type, &init.file_name, true);
        let meta = FileMetadata::new(init.file_name, init.file_size).with_chunk_info(init.total_chunks);
        self.ctx
            .put_entry(
                key.as_str(),
                &MetadataEntry::new(Bytes::new(), None),
                &meta,
                Some(config.init_ttl),
            )
            .await?;

        info!("Initialized chunked upload {} ({} bytes in {} chunks)", key, meta.file_size, init.total_chunks);
        Ok(key)
    }

    /// Stage one chunk and schedule its persistence.
    ///
    /// Re-sending an already persisted index returns its descriptor and
    /// stages nothing.
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    pub async fn accept(&self, key: &StorageKey, index: u32, data: Bytes) -> BlobResult<ChunkAck> {
        if !key.is_chunked() {
            return Err(BlobError::invalid(format!("{key} is not a chunked upload")));
        }
        let (entry, meta) = self.ctx.load(key.as_str()).await?;
        let info = meta
            .chunk_info
            .as_ref()
            .ok_or_else(|| BlobError::invalid(format!("{key} has no chunk tracking")))?;

        if index >= info.total {
            return Err(BlobError::invalid(format!(
                "chunkIndex {index} is out of range for {} chunks",
                info.total
            )));
        }

        if info.uploaded_indices.contains(&index) {
            let descriptor = entry.descriptors()?.into_iter().find(|d| d.idx == index);
            debug!("Chunk {} of {} already persisted", index, key);
            return Ok(ChunkAck {
                key: key.to_string(),
                index,
                duplicate: true,
                descriptor,
            });
        }

        if data.is_empty() {
            return Err(BlobError::invalid("chunk is empty"));
        }
        self.ctx.backend.capabilities().check_size(data.len() as u64)?;

        // Tagged per attempt; only the task that wrote the slot may clear it
        let staging_key = key.staging_key(index);
        let attempt = Uuid::new_v4().simple().to_string();
        {
            let _slot = self.ctx.locks.lock(&staging_key).await;
            self.ctx
                .meta
                .put(
                    &staging_key,
                    data,
                    Some(json!({ "attempt": attempt })),
                    Some(self.ctx.config.staging_ttl),
                )
                .await?;
        }

        let pipeline = self.clone();
        let task_key = key.clone();
        self.ctx.tasks.spawn("chunk persist", async move {
            // Outcome is logged inside; a failed index simply stays absent
            let _ = pipeline.persist(&task_key, index).await;
        });

        Ok(ChunkAck {
            key: key.to_string(),
            index,
            duplicate: false,
            descriptor: None,
        })
    }

    /// Move a staged chunk to the backend and record it.
    ///
    /// Returns the recorded descriptor, or `None` when there was nothing to do.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn persist(&self, key: &StorageKey, index: u32) -> BlobResult<Option<ChunkDescriptor>> {
        let staging_key = key.staging_key(index);
        let Some(staged) = self.ctx.meta.get(&staging_key).await? else {
            warn!("Staging slot for chunk {} of {} is gone", index, key);
            return Ok(None);
        };
        let attempt = staged_attempt(&staged);

        let meta = match self.ctx.load(key.as_str()).await {
            Ok((_, meta)) => meta,
            Err(BlobError::NotFound { .. }) => {
                debug!("Upload {} no longer exists; dropping chunk {}", key, index);
                self.release_slot(&staging_key, attempt.as_deref()).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if meta.chunk_info.as_ref().is_some_and(|c| c.uploaded_indices.contains(&index)) {
            self.release_slot(&staging_key, attempt.as_deref()).await?;
            return Ok(None);
        }

        let object = ObjectPut::part(key.as_str(), index, &meta.file_name, key.file_type());
        let data = staged.value;
        let size = data.len() as u64;

        let pushed = self
            .ctx
            .config
            .retry
            .run("chunk push", |_| self.ctx.backend.put(&object, data.clone()))
            .await;

        let remote_id = match pushed {
            Ok(remote_id) => remote_id,
            Err(e) => {
                error!(
                    "Chunk {} of {} was not persisted after {} attempt(s): {}",
                    index, key, self.ctx.config.retry.max_attempts, e
                );
                self.release_slot(&staging_key, attempt.as_deref()).await?;
                return Err(e);
            }
        };

        let descriptor = ChunkDescriptor {
            idx: index,
            remote_id,
            size,
        };
        let recorded = self.record(key, descriptor).await;
        self.release_slot(&staging_key, attempt.as_deref()).await?;
        recorded
    }

    /// Delete a staging slot only if it still holds the bytes of `attempt`.
    async fn release_slot(&self, staging_key: &str, attempt: Option<&str>) -> BlobResult<()> {
        let _slot = self.ctx.locks.lock(staging_key).await;
        let current = self.ctx.meta.get(staging_key).await?;
        match current {
            Some(entry) if staged_attempt(&entry).as_deref() != attempt => {
                debug!("Staging slot {} was re-filled; leaving it for the newer task", staging_key);
                Ok(())
            }
            Some(_) => self.ctx.meta.delete(staging_key).await,
            None => Ok(()),
        }
    }

    /// Append a descriptor under the key's lock.
    async fn record(&self, key: &StorageKey, descriptor: ChunkDescriptor) -> BlobResult<Option<ChunkDescriptor>> {
        let _guard = self.ctx.locks.lock(key.as_str()).await;

        let (entry, mut meta) = match self.ctx.load(key.as_str()).await {
            Ok(found) => found,
            Err(BlobError::NotFound { .. }) => {
                debug!("Upload {} vanished during push; removing orphan {}", key, descriptor.remote_id);
                self.ctx.delete_blobs(std::slice::from_ref(&descriptor.remote_id)).await;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(info) = meta.chunk_info.as_mut() else {
            return Err(BlobError::invalid(format!("{key} has no chunk tracking")));
        };

        if info.uploaded_indices.contains(&descriptor.idx) {
            debug!("Chunk {} of {} was recorded concurrently; discarding duplicate", descriptor.idx, key);
            self.ctx.delete_blobs(std::slice::from_ref(&descriptor.remote_id)).await;
            return Ok(None);
        }

        let mut descriptors = entry.descriptors()?;
        descriptors.push(descriptor.clone());
        descriptors.sort_by_key(|d| d.idx);
        info.uploaded_indices.insert(descriptor.idx);
        let complete = info.is_complete();
        let (uploaded, total) = (info.uploaded_indices.len(), info.total);

        let ttl = if complete { None } else { Some(self.ctx.config.init_ttl) };
        let value = Bytes::from(serde_json::to_vec(&descriptors)?);
        self.ctx
            .put_entry(key.as_str(), &MetadataEntry::new(value, None), &meta, ttl)
            .await?;

        if complete {
            let assembled: u64 = descriptors.iter().map(|d| d.size).sum();
            if assembled != meta.file_size {
                warn!(
                    "Upload {} completed with {} bytes but declared {}",
                    key, assembled, meta.file_size
                );
            }
            info!("Upload {} complete ({} chunks)", key, total);
        } else {
            debug!("Recorded chunk {} of {} ({}/{})", descriptor.idx, key, uploaded, total);
        }
        Ok(Some(descriptor))
    }

    /// Resumable-upload status
    pub async fn progress(&self, key: &StorageKey) -> BlobResult<UploadProgress> {
        let (_, meta) = self.ctx.load(key.as_str()).await?;
        meta.chunk_info
            .as_ref()
            .map(UploadProgress::from)
            .ok_or_else(|| BlobError::invalid(format!("{key} is not a chunked upload")))
    }
}
fn staged_attempt(entry: &MetadataEntry) -> Option<String> {
    entry
        .metadata
        .as_ref()
        .and_then(|m| m.get("attempt"))
        .and_then(|a| a.as_str())
        .map(str::to_string)
}

