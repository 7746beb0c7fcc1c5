use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{ListPage, MetadataEntry, MetadataStore};
use crate::BlobResult;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    metadata: Option<serde_json::Value>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// In-process metadata store for development and tests.
///
/// Expiry uses `tokio::time::Instant`, so paused test clocks apply.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    entries: Arc<RwLock<BTreeMap<String, StoredEntry>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served (test helper)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Live keys under a prefix, unpaginated (test helper)
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> BlobResult<Option<MetadataEntry>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| MetadataEntry::new(e.value.clone(), e.metadata.clone())))
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        metadata: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> BlobResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().insert(
            key.to_string(),
            StoredEntry {
                value,
                metadata,
                expires_at,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> BlobResult<ListPage> {
        let now = Instant::now();
        let limit = limit.max(1);
        let start = match cursor {
            Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
            Some(_) => Bound::Included(prefix.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let entries = self.entries.read();
        let mut keys: Vec<String> = entries
            .range((start, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .take(limit + 1)
            .collect();

        let cursor = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryMetadataStore::new();
        store
            .put("image:a.png", Bytes::from_static(b"ref"), Some(json!({"fileName": "a.png"})), None)
            .await
            .unwrap();

        let entry = store.get("image:a.png").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"ref"));
        assert_eq!(entry.metadata.unwrap()["fileName"], "a.png");

        store.delete("image:a.png").await.unwrap();
        assert!(store.get("image:a.png").await.unwrap().is_none());
        store.delete("image:a.png").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryMetadataStore::new();
        store
            .put("staging:k:0", Bytes::from_static(b"x"), None, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(store.get("staging:k:0").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get("staging:k:0").await.unwrap().is_none());
        assert!(store.keys_with_prefix("staging:").is_empty());
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn put_without_ttl_clears_previous_ttl() {
        let store = MemoryMetadataStore::new();
        store.put("k", Bytes::new(), None, Some(Duration::ZERO)).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());

        store.put("k", Bytes::new(), None, None).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_paginates_within_prefix() {
        let store = MemoryMetadataStore::new();
        for key in ["image:a.png", "image:b.png", "image:c.png", "trash:image:z.png", "audio:x.mp3"] {
            store.put(key, Bytes::new(), None, None).await.unwrap();
        }

        let first = store.list("image:", None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["image:a.png", "image:b.png"]);
        assert_eq!(first.cursor.as_deref(), Some("image:b.png"));

        let second = store.list("image:", first.cursor.as_deref(), 2).await.unwrap();
        assert_eq!(second.keys, vec!["image:c.png"]);
        assert!(second.cursor.is_none());

        let all = store.list("", None, 100).await.unwrap();
        assert_eq!(all.keys.len(), 5);
    }
}
