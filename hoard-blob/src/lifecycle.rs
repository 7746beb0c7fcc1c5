//! Trash lifecycle: soft delete, restore, permanent delete, and reaping of
//! blobs whose trash entry expired.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::context::{blob_refs, StoreContext};
use crate::metadata::MetadataEntry;
use crate::{BlobError, BlobResult, StorageKey, REAP_PREFIX};

/// Blob references to free once a trash entry has expired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapLedger {
    pub key: String,
    pub remote_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Soft delete and restore over the metadata store
#[derive(Clone)]
pub struct LifecycleManager {
    ctx: Arc<StoreContext>,
}

impl LifecycleManager {
    pub(crate) fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Move a live entry under the trash namespace.
    ///
    /// Only the pointer moves; blobs stay where they are.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn move_to_trash(&self, key: &StorageKey) -> BlobResult<()> {
        let _guard = self.ctx.locks.lock(key.as_str()).await;
        let entry = self
            .ctx
            .meta
            .get(key.as_str())
            .await?
            .ok_or_else(|| BlobError::not_found(key.as_str()))?;

        let trash_ttl = self.ctx.config.trash_ttl;
        let ledger = ReapLedger {
            key: key.to_string(),
            remote_ids: blob_refs(key, &entry)?,
            expires_at: chrono::Duration::from_std(trash_ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        self.ctx
            .meta
            .put(&key.trash_key(), entry.value, entry.metadata, Some(trash_ttl))
            .await?;
        self.ctx
            .meta
            .put(&key.reap_key(), Bytes::from(serde_json::to_vec(&ledger)?), None, None)
            .await?;
        self.ctx.meta.delete(key.as_str()).await?;

        info!("Moved {} to trash ({} blob(s) retained)", key, ledger.remote_ids.len());
        Ok(())
    }

    /// Put a trashed entry back under its live key.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn restore(&self, key: &StorageKey) -> BlobResult<()> {
        let _guard = self.ctx.locks.lock(key.as_str()).await;
        let entry = self
            .ctx
            .meta
            .get(&key.trash_key())
            .await?
            .ok_or_else(|| BlobError::not_found(key.trash_key()))?;

        if self.ctx.meta.get(key.as_str()).await?.is_some() {
            return Err(BlobError::conflict(format!("{key} already exists")));
        }

        // Unfinished uploads keep expiring like any other unfinished upload
        let complete = entry.file_metadata()?.map(|m| m.is_complete()).unwrap_or(true);
        let ttl = if complete { None } else { Some(self.ctx.config.init_ttl) };

        self.ctx
            .meta
            .put(key.as_str(), entry.value, entry.metadata, ttl)
            .await?;
        self.ctx.meta.delete(&key.trash_key()).await?;
        self.ctx.meta.delete(&key.reap_key()).await?;

        info!("Restored {} from trash", key);
        Ok(())
    }

    /// Delete a live or trashed entry and every blob behind it.
    ///
    /// Returns `false` when neither exists. If any blob cannot be deleted
    /// the metadata is kept so the call can be repeated.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn permanent_delete(&self, key: &StorageKey) -> BlobResult<bool> {
        let _guard = self.ctx.locks.lock(key.as_str()).await;

        let entry: Option<MetadataEntry> = match self.ctx.meta.get(key.as_str()).await? {
            Some(entry) => Some(entry),
            None => self.ctx.meta.get(&key.trash_key()).await?,
        };
        match entry {
            Some(entry) => self.destroy(key, &entry).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Like [`permanent_delete`](Self::permanent_delete) but only for an
    /// entry currently in the trash; a live entry is left alone.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn purge_trashed(&self, key: &StorageKey) -> BlobResult<bool> {
        let _guard = self.ctx.locks.lock(key.as_str()).await;
        match self.ctx.meta.get(&key.trash_key()).await? {
            Some(entry) => self.destroy(key, &entry).await.map(|_| true),
            None => Ok(false),
        }
    }

    async fn destroy(&self, key: &StorageKey, entry: &MetadataEntry) -> BlobResult<()> {
        let remote_ids = blob_refs(key, entry)?;
        let failed = self.ctx.delete_blobs(&remote_ids).await;
        if !failed.is_empty() {
            return Err(BlobError::Backend {
                source: format!("{} of {} blob(s) could not be deleted", failed.len(), remote_ids.len()).into(),
            });
        }

        self.ctx.meta.delete(key.as_str()).await?;
        self.ctx.meta.delete(&key.trash_key()).await?;
        self.ctx.meta.delete(&key.reap_key()).await?;

        info!("Permanently deleted {} ({} blob(s))", key, remote_ids.len());
        Ok(())
    }

    /// Free the blobs of every trash entry that expired before `now`.
    pub async fn reap_expired_at(&self, now: DateTime<Utc>) -> BlobResult<usize> {
        let mut reaped = 0;
        let mut cursor: Option<String> = None;
        let mut due = Vec::new();

        loop {
            let page = self.ctx.meta.list(REAP_PREFIX, cursor.as_deref(), 100).await?;
            for ledger_key in page.keys {
                let Some(entry) = self.ctx.meta.get(&ledger_key).await? else {
                    continue;
                };
                match serde_json::from_slice::<ReapLedger>(&entry.value) {
                    Ok(ledger) if ledger.expires_at <= now => due.push(ledger),
                    Ok(_) => {}
                    Err(e) => warn!("Unreadable reap ledger {}: {}", ledger_key, e),
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        for ledger in due {
            if self.reap(&ledger).await? {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn reap(&self, ledger: &ReapLedger) -> BlobResult<bool> {
        let key = StorageKey::parse(&ledger.key)?;
        let _guard = self.ctx.locks.lock(key.as_str()).await;

        // Restored meanwhile: the ledger is gone or the blobs are live again
        if self.ctx.meta.get(&key.reap_key()).await?.is_none() {
            return Ok(false);
        }
        if self.ctx.meta.get(key.as_str()).await?.is_some() {
            warn!("{} is live again; dropping stale reap ledger", key);
            self.ctx.meta.delete(&key.reap_key()).await?;
            return Ok(false);
        }

        let failed = self.ctx.delete_blobs(&ledger.remote_ids).await;
        if !failed.is_empty() {
            warn!("Reaping {} left {} blob(s); will retry", key, failed.len());
            return Ok(false);
        }

        self.ctx.meta.delete(&key.trash_key()).await?;
        self.ctx.meta.delete(&key.reap_key()).await?;
        debug!("Reaped {} ({} blob(s))", key, ledger.remote_ids.len());
        Ok(true)
    }
}

/// Periodically frees blobs of expired trash entries
pub struct TrashReaper {
    lifecycle: LifecycleManager,
    interval: Duration,
}

impl TrashReaper {
    pub fn new(lifecycle: LifecycleManager) -> Self {
        Self {
            lifecycle,
            interval: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_interval(lifecycle: LifecycleManager, interval: Duration) -> Self {
        Self { lifecycle, interval }
    }

    /// Run forever; spawn this on the runtime.
    pub async fn start(self) {
        let mut ticker = interval(self.interval);
        info!("Starting trash reaper with interval: {:?}", self.interval);

        loop {
            ticker.tick().await;
            match self.reap_once().await {
                Ok(0) => debug!("No expired trash entries"),
                Ok(count) => info!("Reaped blobs of {} expired trash entries", count),
                Err(e) => warn!("Error during trash reaping: {}", e),
            }
        }
    }

    /// One reaper cycle
    pub async fn reap_once(&self) -> BlobResult<usize> {
        self.lifecycle.reap_expired_at(Utc::now()).await
    }
}
