use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::assembler::{ByteRange, ChunkAssembler, ChunkPlan};
use crate::backend::{BackendCapabilities, BlobBackend, ObjectPut};
use crate::context::StoreContext;
use crate::ingest::ChunkIngest;
use crate::lifecycle::{LifecycleManager, TrashReaper};
use crate::metadata::{ListPage, MetadataEntry, MetadataStore};
use crate::{
    BlobConfig, BlobError, BlobResult, ByteStream, ChunkAck, ChunkedInit, FileMetadata, FileType, MetadataPatch,
    StorageKey, UploadProgress, TRASH_PREFIX,
};

/// Whole-file upload request
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    /// Derived from `content_type` when absent
    pub file_type: Option<FileType>,
    pub tags: Vec<String>,
    pub data: Bytes,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            file_type: None,
            tags: Vec::new(),
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    fn resolved_file_type(&self) -> FileType {
        self.file_type.unwrap_or_else(|| {
            self.content_type
                .as_deref()
                .map(FileType::from_content_type)
                .unwrap_or(FileType::Document)
        })
    }
}

/// Content stream plus what the HTTP layer needs for headers
pub struct ReadResponse {
    pub key: StorageKey,
    pub file_name: String,
    pub stream: ByteStream,
    /// 200 for full reads, 206 for ranged reads
    pub status: u16,
    pub content_length: u64,
    pub content_range: Option<String>,
    pub total_size: u64,
}

impl std::fmt::Debug for ReadResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadResponse")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("total_size", &self.total_size)
            .finish()
    }
}

/// File metadata together with the raw stored value
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataView {
    pub metadata: FileMetadata,
    /// Remote reference (whole files) or descriptor list (chunked files)
    pub value: serde_json::Value,
}

/// Which namespace a listing walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Live keys, optionally of one type
    Live(Option<FileType>),
    Trash,
}

/// The storage contract: uploads, range-correct reads, deletes and trash
#[derive(Clone)]
pub struct StorageAdapter {
    ctx: Arc<StoreContext>,
    ingest: ChunkIngest,
    lifecycle: LifecycleManager,
    assembler: ChunkAssembler,
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("backend", &self.ctx.backend.name())
            .field("capabilities", &self.ctx.backend.capabilities())
            .finish_non_exhaustive()
    }
}

impl StorageAdapter {
    pub fn new(meta: Arc<dyn MetadataStore>, backend: Arc<dyn BlobBackend>, config: BlobConfig) -> Self {
        let assembler = ChunkAssembler::new(backend.clone(), config.retry.clone());
        let ctx = Arc::new(StoreContext::new(meta, backend, config));
        Self {
            ingest: ChunkIngest::new(ctx.clone()),
            lifecycle: LifecycleManager::new(ctx.clone()),
            assembler,
            ctx,
        }
    }

    pub fn config(&self) -> &BlobConfig {
        &self.ctx.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.ctx.backend.name()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.ctx.backend.capabilities()
    }

    pub fn ingest(&self) -> &ChunkIngest {
        &self.ingest
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Reaper over this adapter's stores, ticking at the configured interval
    pub fn reaper(&self) -> TrashReaper {
        TrashReaper::with_interval(self.lifecycle.clone(), self.ctx.config.reaper_interval)
    }

    /// Wait for all background chunk persistence to finish.
    pub async fn drain(&self) {
        self.ctx.tasks.drain().await;
    }

    /// Store a file as a single backend object.
    #[instrument(skip(self, upload), fields(file_name = %upload.file_name, size = upload.data.len()))]
    pub async fn upload_file(&self, upload: FileUpload) -> BlobResult<StorageKey> {
        let size = upload.data.len() as u64;
        if size == 0 {
            return Err(BlobError::invalid("file is empty"));
        }
        if size > self.ctx.config.max_whole_file_bytes {
            return Err(BlobError::SizeLimitExceeded {
                size,
                max: self.ctx.config.max_whole_file_bytes,
            });
        }
        self.ctx.backend.capabilities().check_size(size)?;

        let file_type = upload.resolved_file_type();
        let key = StorageKey::generate(file_type, &upload.file_name, false);
        let mut object = ObjectPut::whole(key.as_str(), upload.file_name.clone(), file_type);
        object.content_type = upload.content_type.clone();

        let data = upload.data;
        let remote_id = self
            .ctx
            .config
            .retry
            .run("file push", |_| self.ctx.backend.put(&object, data.clone()))
            .await?;

        let meta = FileMetadata::new(upload.file_name, size).with_tags(upload.tags);
        let entry = MetadataEntry::new(Bytes::from(remote_id.clone()), None);
        if let Err(e) = self.ctx.put_entry(key.as_str(), &entry, &meta, None).await {
            warn!("Metadata write for {} failed; removing uploaded object", key);
            self.ctx.delete_blobs(&[remote_id]).await;
            return Err(e);
        }

        info!("Stored {} ({} bytes) via {}", key, size, self.backend_name());
        Ok(key)
    }

    pub async fn init_chunked(&self, init: ChunkedInit) -> BlobResult<StorageKey> {
        self.ingest.init(init).await
    }

    pub async fn upload_chunk(&self, key: &StorageKey, index: u32, data: Bytes) -> BlobResult<ChunkAck> {
        self.ingest.accept(key, index, data).await
    }

    pub async fn progress(&self, key: &StorageKey) -> BlobResult<UploadProgress> {
        self.ingest.progress(key).await
    }

    /// Read a live file, whole or by `Range` header.
    pub async fn get(&self, key: &StorageKey, range: Option<&str>) -> BlobResult<ReadResponse> {
        let (entry, meta) = self.ctx.load(key.as_str()).await?;
        self.read(key, entry, meta, range).await
    }

    /// Read a trashed file's content.
    pub async fn get_trashed(&self, key: &StorageKey, range: Option<&str>) -> BlobResult<ReadResponse> {
        let (entry, meta) = self.ctx.load(&key.trash_key()).await?;
        self.read(key, entry, meta, range).await
    }

    async fn read(
        &self,
        key: &StorageKey,
        entry: MetadataEntry,
        meta: FileMetadata,
        range: Option<&str>,
    ) -> BlobResult<ReadResponse> {
        let plan = if key.is_chunked() {
            let info = meta
                .chunk_info
                .as_ref()
                .ok_or_else(|| BlobError::invalid(format!("{key} has no chunk tracking")))?;
            if !info.is_complete() {
                return Err(BlobError::IncompleteUpload {
                    uploaded: info.uploaded_indices.len() as u32,
                    total: info.total,
                });
            }
            ChunkPlan::new(entry.descriptors()?, info.total)?
        } else {
            ChunkPlan::single(entry.value_str()?, meta.file_size)
        };

        let total_size = plan.total_size();
        let range = range
            .map(|header| ByteRange::parse(header, total_size))
            .transpose()?;
        let stream = self.assembler.open(plan.reads(range)).await?;

        Ok(ReadResponse {
            key: key.clone(),
            file_name: meta.file_name,
            stream,
            status: if range.is_some() { 206 } else { 200 },
            content_length: range.map(|r| r.len()).unwrap_or(total_size),
            content_range: range.map(|r| r.content_range(total_size)),
            total_size,
        })
    }

    /// Permanently delete a live or trashed file and its blobs.
    pub async fn delete(&self, key: &StorageKey) -> BlobResult<bool> {
        self.lifecycle.permanent_delete(key).await
    }

    /// Permanently delete a trashed file; live files are untouched.
    pub async fn delete_trashed(&self, key: &StorageKey) -> BlobResult<bool> {
        self.lifecycle.purge_trashed(key).await
    }

    pub async fn get_metadata(&self, key: &StorageKey) -> BlobResult<MetadataView> {
        let (entry, metadata) = self.ctx.load(key.as_str()).await?;
        let value = if key.is_chunked() {
            serde_json::to_value(entry.descriptors()?)?
        } else {
            serde_json::Value::String(entry.value_str()?.to_string())
        };
        Ok(MetadataView { metadata, value })
    }

    /// Edit the user-facing fields of a live file.
    #[instrument(skip(self, patch), fields(key = %key))]
    pub async fn update_metadata(&self, key: &StorageKey, patch: MetadataPatch) -> BlobResult<FileMetadata> {
        if patch.is_empty() {
            return Err(BlobError::invalid("nothing to update"));
        }
        let _guard = self.ctx.locks.lock(key.as_str()).await;
        let (entry, mut meta) = self.ctx.load(key.as_str()).await?;
        patch.apply(&mut meta);

        let ttl = if meta.is_complete() { None } else { Some(self.ctx.config.init_ttl) };
        self.ctx.put_entry(key.as_str(), &entry, &meta, ttl).await?;
        Ok(meta)
    }

    /// Page through live or trashed keys.
    ///
    /// A key that is live never shows up in the trash listing, so pages of
    /// trashed keys may come back shorter than `limit`.
    ///
    /// Live listings walk one type prefix after another; the cursor records
    /// the type and the store's own cursor within it.
    pub async fn list(&self, scope: ListScope, cursor: Option<&str>, limit: usize) -> BlobResult<ListPage> {
        let limit = limit.clamp(1, 1000);
        match scope {
            ListScope::Trash => {
                let page = self.ctx.meta.list(TRASH_PREFIX, cursor, limit).await?;
                let mut keys = Vec::with_capacity(page.keys.len());
                for key in page.keys {
                    let Some(live) = key.strip_prefix(TRASH_PREFIX) else {
                        continue;
                    };
                    // Mid-move or mid-restore both entries exist; the live one wins
                    if self.ctx.meta.get(live).await?.is_none() {
                        keys.push(live.to_string());
                    }
                }
                Ok(ListPage {
                    keys,
                    cursor: page.cursor,
                })
            }
            ListScope::Live(only) => {
                let types: Vec<FileType> = match only {
                    Some(t) => vec![t],
                    None => FileType::ALL.to_vec(),
                };
                let (mut position, mut inner) = match cursor {
                    Some(c) => decode_list_cursor(c, &types)?,
                    None => (0, None),
                };

                let mut keys = Vec::new();
                while position < types.len() && keys.len() < limit {
                    let prefix = format!("{}:", types[position].as_str());
                    let page = self.ctx.meta.list(&prefix, inner.as_deref(), limit - keys.len()).await?;
                    keys.extend(page.keys);
                    match page.cursor {
                        Some(next) => inner = Some(next),
                        None => {
                            position += 1;
                            inner = None;
                        }
                    }
                }

                let cursor = (position < types.len()).then(|| {
                    format!("{}|{}", types[position].as_str(), inner.unwrap_or_default())
                });
                Ok(ListPage { keys, cursor })
            }
        }
    }

    pub async fn move_to_trash(&self, key: &StorageKey) -> BlobResult<()> {
        self.lifecycle.move_to_trash(key).await
    }

    pub async fn restore_from_trash(&self, key: &StorageKey) -> BlobResult<()> {
        self.lifecycle.restore(key).await
    }
}

fn decode_list_cursor(cursor: &str, types: &[FileType]) -> BlobResult<(usize, Option<String>)> {
    let (kind, inner) = cursor
        .split_once('|')
        .ok_or_else(|| BlobError::invalid("malformed listing cursor"))?;
    let kind: FileType = kind.parse()?;
    let position = types
        .iter()
        .position(|t| *t == kind)
        .ok_or_else(|| BlobError::invalid("listing cursor does not match the requested type"))?;
    let inner = (!inner.is_empty()).then(|| inner.to_string());
    Ok((position, inner))
}
