use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use super::{BackendCapabilities, BlobBackend, ObjectPut};
use crate::{BlobError, BlobResult};

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    gets: AtomicU64,
    range_gets: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory backend with switchable capabilities, call counters and
/// failure injection. Used for development and conformance tests.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    objects: Arc<DashMap<String, Bytes>>,
    counters: Arc<Counters>,
    supports_range: bool,
    max_object_size: Option<u64>,
    fail_next_puts: Arc<AtomicU32>,
    fail_all_puts: Arc<AtomicBool>,
    put_delay: Option<Duration>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Range-capable, uncapped
    pub fn new() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            supports_range: true,
            max_object_size: None,
            fail_next_puts: Arc::new(AtomicU32::new(0)),
            fail_all_puts: Arc::new(AtomicBool::new(false)),
            put_delay: None,
        }
    }

    /// Behaves like the relay: no partial reads, hard object cap
    pub fn relay_like(max_object_size: u64) -> Self {
        Self::new().without_range().with_max_object_size(max_object_size)
    }

    pub fn without_range(mut self) -> Self {
        self.supports_range = false;
        self
    }

    pub fn with_max_object_size(mut self, bytes: u64) -> Self {
        self.max_object_size = Some(bytes);
        self
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    /// Make the next `n` puts fail with a transient error
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_next_puts.store(n, Ordering::SeqCst);
    }

    /// Make every put fail until switched off
    pub fn set_fail_all_puts(&self, fail: bool) {
        self.fail_all_puts.store(fail, Ordering::SeqCst);
    }

    /// Drop an object behind the adapter's back
    pub fn remove_object(&self, remote_id: &str) -> bool {
        self.objects.remove(remote_id).is_some()
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.objects.contains_key(remote_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn put_count(&self) -> u64 {
        self.counters.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> u64 {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn range_get_count(&self) -> u64 {
        self.counters.range_gets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u64 {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    /// Every backend call of any kind
    pub fn call_count(&self) -> u64 {
        self.put_count() + self.get_count() + self.range_get_count() + self.delete_count()
    }

    fn take_injected_failure(&self) -> bool {
        if self.fail_all_puts.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn lookup(&self, remote_id: &str) -> BlobResult<Bytes> {
        self.objects
            .get(remote_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobError::read_failed(remote_id, "object missing"))
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> BackendCapabilities {
        let mut caps = BackendCapabilities::basic();
        if self.supports_range {
            caps = caps.with_range();
        }
        if let Some(max) = self.max_object_size {
            caps = caps.with_max_object_size(max);
        }
        caps
    }

    async fn put(&self, object: &ObjectPut, data: Bytes) -> BlobResult<String> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        self.capabilities().check_size(data.len() as u64)?;
        if self.take_injected_failure() {
            return Err(BlobError::upload_failed(format!(
                "injected failure for {}",
                object.object_name
            )));
        }

        let remote_id = format!("mem-{}", Uuid::new_v4().simple());
        self.objects.insert(remote_id.clone(), data);
        Ok(remote_id)
    }

    async fn get(&self, remote_id: &str) -> BlobResult<Bytes> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.lookup(remote_id)
    }

    async fn get_range(&self, remote_id: &str, offset: u64, len: u64) -> BlobResult<Bytes> {
        if !self.supports_range {
            return Err(BlobError::Unsupported);
        }
        self.counters.range_gets.fetch_add(1, Ordering::SeqCst);
        let data = self.lookup(remote_id)?;
        let start = offset as usize;
        let end = start.saturating_add(len as usize);
        if end > data.len() {
            return Err(BlobError::read_failed(
                remote_id,
                format!("range {start}..{end} past object end {}", data.len()),
            ));
        }
        Ok(data.slice(start..end))
    }

    async fn delete(&self, remote_id: &str) -> BlobResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.remove(remote_id);
        Ok(())
    }
}
