use std::sync::Arc;

use tracing::warn;

use crate::backend::BlobBackend;
use crate::locks::KeyedLocks;
use crate::metadata::{MetadataEntry, MetadataStore};
use crate::tasks::TaskRunner;
use crate::{BlobConfig, BlobError, BlobResult, FileMetadata, StorageKey};

/// Everything the pipeline, lifecycle manager and adapter share
pub(crate) struct StoreContext {
    pub meta: Arc<dyn MetadataStore>,
    pub backend: Arc<dyn BlobBackend>,
    pub config: BlobConfig,
    pub locks: KeyedLocks,
    pub tasks: TaskRunner,
}

impl StoreContext {
    pub fn new(meta: Arc<dyn MetadataStore>, backend: Arc<dyn BlobBackend>, config: BlobConfig) -> Self {
        let tasks = TaskRunner::new(config.max_background_tasks);
        Self {
            meta,
            backend,
            config,
            locks: KeyedLocks::new(),
            tasks,
        }
    }

    /// Read an entry and its file metadata, or `NotFound`.
    pub async fn load(&self, store_key: &str) -> BlobResult<(MetadataEntry, FileMetadata)> {
        let entry = self
            .meta
            .get(store_key)
            .await?
            .ok_or_else(|| BlobError::not_found(store_key))?;
        let meta = entry
            .file_metadata()?
            .ok_or_else(|| BlobError::not_found(store_key))?;
        Ok((entry, meta))
    }

    pub async fn put_entry(
        &self,
        store_key: &str,
        entry: &MetadataEntry,
        meta: &FileMetadata,
        ttl: Option<std::time::Duration>,
    ) -> BlobResult<()> {
        let sidecar = serde_json::to_value(meta)?;
        self.meta
            .put(store_key, entry.value.clone(), Some(sidecar), ttl)
            .await
    }

    /// Delete every object; returns the references that could not be deleted.
    pub async fn delete_blobs(&self, remote_ids: &[String]) -> Vec<String> {
        let mut failed = Vec::new();
        for remote_id in remote_ids {
            let result = self
                .config
                .retry
                .run("blob delete", |_| self.backend.delete(remote_id))
                .await;
            if let Err(e) = result {
                warn!("Failed to delete blob {}: {}", remote_id, e);
                failed.push(remote_id.clone());
            }
        }
        failed
    }
}

/// Backend object references held by an entry.
pub(crate) fn blob_refs(key: &StorageKey, entry: &MetadataEntry) -> BlobResult<Vec<String>> {
    if key.is_chunked() {
        return Ok(entry.descriptors()?.into_iter().map(|d| d.remote_id).collect());
    }
    let remote_id = entry.value_str()?;
    if remote_id.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(vec![remote_id.to_string()])
    }
}
