use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::pin::Pin;
use uuid::Uuid;

use crate::{BlobError, BlobResult};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = BlobResult<Bytes>> + Send>>;

/// Reserved marker at the start of a chunked key's opaque id
pub const CHUNK_MARKER: &str = "chunk_";

/// Key prefix of the trash namespace
pub const TRASH_PREFIX: &str = "trash:";

/// Key prefix of staged chunk slots
pub const STAGING_PREFIX: &str = "staging:";

/// Key prefix of the blob reap ledger
pub const REAP_PREFIX: &str = "reap:";

/// Media class of a stored file; the first segment of every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Audio,
    Video,
    Document,
}

impl FileType {
    pub const ALL: [FileType; 4] = [
        FileType::Image,
        FileType::Audio,
        FileType::Video,
        FileType::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Audio => "audio",
            FileType::Video => "video",
            FileType::Document => "document",
        }
    }

    /// Classify by MIME type, falling back to `Document`.
    pub fn from_content_type(content_type: &str) -> Self {
        let major = content_type.split('/').next().unwrap_or_default();
        match major.trim().to_ascii_lowercase().as_str() {
            "image" => FileType::Image,
            "audio" => FileType::Audio,
            "video" => FileType::Video,
            _ => FileType::Document,
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(FileType::Image),
            "audio" => Ok(FileType::Audio),
            "video" => Ok(FileType::Video),
            "document" => Ok(FileType::Document),
            other => Err(BlobError::invalid(format!("unknown file type '{other}'"))),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live storage key: `{type}:{opaque-id}.{ext}`.
///
/// Chunk-originated keys carry [`CHUNK_MARKER`] at the start of the opaque id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey {
    raw: String,
    file_type: FileType,
}

impl StorageKey {
    /// Mint a fresh key for a new upload.
    pub fn generate(file_type: FileType, file_name: &str, chunked: bool) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let marker = if chunked { CHUNK_MARKER } else { "" };
        let ext = extension_of(file_name);
        Self {
            raw: format!("{}:{}{}.{}", file_type.as_str(), marker, id, ext),
            file_type,
        }
    }

    /// Parse and validate a live key.
    pub fn parse(raw: &str) -> BlobResult<Self> {
        let (kind, rest) = raw
            .split_once(':')
            .ok_or_else(|| BlobError::invalid(format!("malformed storage key '{raw}'")))?;
        let file_type: FileType = kind.parse()?;

        let (id, ext) = rest
            .rsplit_once('.')
            .ok_or_else(|| BlobError::invalid(format!("storage key '{raw}' has no extension")))?;
        let id = id.strip_prefix(CHUNK_MARKER).unwrap_or(id);
        if id.is_empty() || ext.is_empty() || rest.contains(':') || rest.contains('/') {
            return Err(BlobError::invalid(format!("malformed storage key '{raw}'")));
        }

        Ok(Self {
            raw: raw.to_string(),
            file_type,
        })
    }

    /// Parse a `trash:`-prefixed key back to the live key it shadows.
    pub fn from_trash(raw: &str) -> BlobResult<Self> {
        Self::parse(raw.strip_prefix(TRASH_PREFIX).unwrap_or(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Whether reads must assemble this key from a chunk set.
    pub fn is_chunked(&self) -> bool {
        self.opaque_id().starts_with(CHUNK_MARKER)
    }

    pub fn extension(&self) -> &str {
        self.raw.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default()
    }

    fn opaque_id(&self) -> &str {
        self.raw.split_once(':').map(|(_, rest)| rest).unwrap_or_default()
    }

    pub fn trash_key(&self) -> String {
        format!("{TRASH_PREFIX}{}", self.raw)
    }

    pub fn staging_key(&self, index: u32) -> String {
        format!("{STAGING_PREFIX}{}:{index}", self.raw)
    }

    pub fn reap_key(&self) -> String {
        format!("{REAP_PREFIX}{}", self.raw)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = BlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StorageKey::parse(&value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.raw
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn extension_of(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

/// Completion tracking for a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub total: u32,
    pub uploaded_indices: BTreeSet<u32>,
}

impl ChunkInfo {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            uploaded_indices: BTreeSet::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_indices.len() as u64 == self.total as u64
    }
}

/// Per-key file metadata, stored as the structured half of a metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_info: Option<ChunkInfo>,
}

impl FileMetadata {
    pub fn new<S: Into<String>>(file_name: S, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            uploaded_at: Utc::now(),
            liked: false,
            tags: Vec::new(),
            chunk_info: None,
        }
    }

    pub fn with_chunk_info(mut self, total: u32) -> Self {
        self.chunk_info = Some(ChunkInfo::new(total));
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whole-file entries are always complete.
    pub fn is_complete(&self) -> bool {
        self.chunk_info.as_ref().map(ChunkInfo::is_complete).unwrap_or(true)
    }
}

/// One persisted part of a chunked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub idx: u32,
    pub remote_id: String,
    pub size: u64,
}

/// User-editable fields of [`FileMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub liked: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.file_name.is_none() && self.liked.is_none() && self.tags.is_none()
    }

    pub fn apply(&self, meta: &mut FileMetadata) {
        if let Some(name) = &self.file_name {
            meta.file_name = name.clone();
        }
        if let Some(liked) = self.liked {
            meta.liked = liked;
        }
        if let Some(tags) = &self.tags {
            meta.tags = tags.clone();
        }
    }
}

/// Resumable-upload status returned by `progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub uploaded_indices: Vec<u32>,
    pub uploaded: u32,
    pub total: u32,
    pub complete: bool,
}

impl From<&ChunkInfo> for UploadProgress {
    fn from(info: &ChunkInfo) -> Self {
        let uploaded_indices: Vec<u32> = info.uploaded_indices.iter().copied().collect();
        Self {
            uploaded: uploaded_indices.len() as u32,
            total: info.total,
            complete: info.is_complete(),
            uploaded_indices,
        }
    }
}

/// Client acknowledgment for one submitted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub key: String,
    pub index: u32,
    /// `true` when the index was already persisted and nothing was staged
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<ChunkDescriptor>,
}

/// Parameters for starting a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedInit {
    pub file_type: FileType,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
}
