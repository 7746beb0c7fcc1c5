//! Range engine for virtual merged files.
//!
//! A chunked file is the concatenation of its parts in index order. This
//! module resolves `Range` headers against that virtual stream, plans the
//! minimal set of backend reads, and emits the bytes in order.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::backend::BlobBackend;
use crate::retry::RetryPolicy;
use crate::{BlobError, BlobResult, ByteStream, ChunkDescriptor};

/// Inclusive byte range resolved against a known total size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }

    /// Parse a single-range `Range` header against `total` bytes.
    ///
    /// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. An end past the last
    /// byte is clamped. Multiple ranges, other units, and ranges starting at
    /// or beyond `total` are rejected.
    pub fn parse(header: &str, total: u64) -> BlobResult<Self> {
        let ranges = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| BlobError::invalid_range(format!("unsupported range unit in '{header}'")))?;
        if ranges.contains(',') {
            return Err(BlobError::invalid_range("multiple ranges are not supported"));
        }
        let (first, last) = ranges
            .trim()
            .split_once('-')
            .ok_or_else(|| BlobError::invalid_range(format!("malformed range '{header}'")))?;
        let (first, last) = (first.trim(), last.trim());

        let parse_num = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| BlobError::invalid_range(format!("malformed range '{header}'")))
        };

        if total == 0 {
            return Err(BlobError::invalid_range("range requested on an empty file"));
        }

        let range = match (first.is_empty(), last.is_empty()) {
            (true, true) => return Err(BlobError::invalid_range(format!("malformed range '{header}'"))),
            (true, false) => {
                let suffix = parse_num(last)?;
                if suffix == 0 {
                    return Err(BlobError::invalid_range("zero-length suffix range"));
                }
                ByteRange {
                    start: total.saturating_sub(suffix),
                    end: total - 1,
                }
            }
            (false, true) => ByteRange {
                start: parse_num(first)?,
                end: total - 1,
            },
            (false, false) => {
                let start = parse_num(first)?;
                let end = parse_num(last)?;
                if end < start {
                    return Err(BlobError::invalid_range(format!("range end before start in '{header}'")));
                }
                ByteRange {
                    start,
                    end: end.min(total - 1),
                }
            }
        };

        if range.start >= total {
            return Err(BlobError::invalid_range(format!(
                "range start {} is beyond file size {}",
                range.start, total
            )));
        }
        Ok(range)
    }
}

/// One backend read scheduled by a [`ChunkPlan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRead {
    pub descriptor: ChunkDescriptor,
    /// Offset of the wanted bytes inside the chunk
    pub offset: u64,
    pub len: u64,
}

impl ChunkRead {
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && self.len == self.descriptor.size
    }
}

/// Validated, index-ordered chunk set with precomputed offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunks: Vec<ChunkDescriptor>,
    offsets: Vec<u64>,
    total_size: u64,
}

impl ChunkPlan {
    /// Build a plan from descriptors in any order.
    ///
    /// Indices must be exactly `0..total`; anything else is an incomplete
    /// upload and no plan is produced.
    pub fn new(mut descriptors: Vec<ChunkDescriptor>, total: u32) -> BlobResult<Self> {
        descriptors.sort_by_key(|d| d.idx);
        descriptors.dedup_by_key(|d| d.idx);

        let contiguous = descriptors.iter().enumerate().all(|(i, d)| d.idx as usize == i);
        if descriptors.len() != total as usize || !contiguous {
            let uploaded = descriptors.iter().filter(|d| d.idx < total).count() as u32;
            return Err(BlobError::IncompleteUpload { uploaded, total });
        }

        let mut offsets = Vec::with_capacity(descriptors.len());
        let mut running = 0u64;
        for d in &descriptors {
            offsets.push(running);
            running += d.size;
        }

        Ok(Self {
            chunks: descriptors,
            offsets,
            total_size: running,
        })
    }

    /// A plain object viewed as a one-chunk file
    pub fn single(remote_id: impl Into<String>, size: u64) -> Self {
        Self {
            chunks: vec![ChunkDescriptor {
                idx: 0,
                remote_id: remote_id.into(),
                size,
            }],
            offsets: vec![0],
            total_size: size,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    /// Reads needed for `range` (or the whole file), skipping chunks that do
    /// not overlap it.
    pub fn reads(&self, range: Option<ByteRange>) -> Vec<ChunkRead> {
        let (start, end) = match range {
            Some(r) => (r.start, r.end),
            None if self.total_size == 0 => return Vec::new(),
            None => (0, self.total_size - 1),
        };

        self.chunks
            .iter()
            .zip(&self.offsets)
            .filter(|(d, _)| d.size > 0)
            .filter_map(|(d, &chunk_start)| {
                let chunk_end = chunk_start + d.size - 1;
                if chunk_end < start || chunk_start > end {
                    return None;
                }
                let from = start.max(chunk_start);
                let to = end.min(chunk_end);
                Some(ChunkRead {
                    descriptor: d.clone(),
                    offset: from - chunk_start,
                    len: to - from + 1,
                })
            })
            .collect()
    }
}

/// Streams planned reads from a backend, one chunk at a time, in index order
#[derive(Clone)]
pub struct ChunkAssembler {
    backend: Arc<dyn BlobBackend>,
    retry: RetryPolicy,
}

impl ChunkAssembler {
    pub fn new(backend: Arc<dyn BlobBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Fetch exactly the bytes one read asks for.
    pub async fn fetch(&self, read: &ChunkRead) -> BlobResult<Bytes> {
        let remote_id = read.descriptor.remote_id.as_str();
        let ranged = !read.is_whole() && self.backend.capabilities().supports_range;

        let data = self
            .retry
            .run("chunk read", move |_| async move {
                if ranged {
                    self.backend.get_range(remote_id, read.offset, read.len).await
                } else {
                    self.backend.get(remote_id).await
                }
            })
            .await?;

        if ranged {
            if data.len() as u64 != read.len {
                return Err(BlobError::read_failed(
                    remote_id,
                    format!("ranged read returned {} bytes, wanted {}", data.len(), read.len),
                ));
            }
            return Ok(data);
        }

        if data.len() as u64 != read.descriptor.size {
            warn!(
                "Chunk {} ({}) is {} bytes, descriptor says {}",
                read.descriptor.idx,
                remote_id,
                data.len(),
                read.descriptor.size
            );
            return Err(BlobError::read_failed(
                remote_id,
                format!("object is {} bytes, expected {}", data.len(), read.descriptor.size),
            ));
        }

        let start = read.offset as usize;
        let end = start + read.len as usize;
        Ok(data.slice(start..end))
    }

    /// Lazily fetch `reads` in order as a byte stream.
    ///
    /// A backend failure ends the stream with an error after the bytes
    /// already emitted; nothing is ever skipped or padded.
    pub fn stream(&self, reads: Vec<ChunkRead>) -> ByteStream {
        let assembler = self.clone();
        debug!("Assembling {} chunk read(s) via {}", reads.len(), self.backend.name());

        Box::pin(async_stream::try_stream! {
            for read in reads {
                let bytes = assembler.fetch(&read).await?;
                yield bytes;
            }
        })
    }

    /// Like [`stream`](Self::stream), but the first read happens before
    /// returning, so a missing or unreadable leading object fails the call
    /// instead of a body that has already been promised.
    pub async fn open(&self, mut reads: Vec<ChunkRead>) -> BlobResult<ByteStream> {
        use futures::StreamExt;

        if reads.is_empty() {
            return Ok(self.stream(reads));
        }
        let rest = reads.split_off(1);
        let first = self.fetch(&reads[0]).await?;
        let head = futures::stream::once(async move { Ok::<_, BlobError>(first) });
        Ok(Box::pin(head.chain(self.stream(rest))))
    }

    /// Collect a whole stream into memory (small files and tests).
    pub async fn collect(mut stream: ByteStream) -> BlobResult<Bytes> {
        use futures::StreamExt;

        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(out))
    }
}
