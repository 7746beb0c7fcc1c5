use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ListPage, MetadataEntry, MetadataStore};
use crate::{BlobError, BlobResult};

/// Value and sidecar stored together as one JSON document per key
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

/// Metadata store on Redis, using native key expiry for TTLs
#[derive(Clone)]
pub struct RedisMetadataStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisMetadataStore {
    /// Connect to `url`; every key is stored under `namespace`.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> BlobResult<Self> {
        let client = redis::Client::open(url).map_err(BlobError::backend)?;
        let conn = ConnectionManager::new(client).await.map_err(BlobError::backend)?;
        let mut namespace = namespace.into();
        if !namespace.is_empty() && !namespace.ends_with(':') {
            namespace.push(':');
        }
        Ok(Self { conn, namespace })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn get(&self, key: &str) -> BlobResult<Option<MetadataEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(self.full_key(key)).await.map_err(BlobError::backend)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&raw)?;
        let value = general_purpose::STANDARD
            .decode(envelope.value)
            .map_err(BlobError::backend)?;
        Ok(Some(MetadataEntry::new(Bytes::from(value), envelope.metadata)))
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        metadata: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> BlobResult<()> {
        let payload = serde_json::to_vec(&Envelope {
            value: general_purpose::STANDARD.encode(&value),
            metadata,
        })?;

        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);
        match ttl {
            Some(ttl) => {
                let millis = (ttl.as_millis() as u64).max(1);
                let _: () = conn.pset_ex(full_key, payload, millis).await.map_err(BlobError::backend)?;
            }
            None => {
                let _: () = conn.set(full_key, payload).await.map_err(BlobError::backend)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.full_key(key)).await.map_err(BlobError::backend)?;
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> BlobResult<ListPage> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let scan_cursor: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);

        let (next, raw_keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(scan_cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(limit.max(1))
            .query_async(&mut conn)
            .await
            .map_err(BlobError::backend)?;

        debug!("SCAN {} from {} returned {} keys", pattern, scan_cursor, raw_keys.len());

        let keys = raw_keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.namespace).map(str::to_string))
            .collect();

        Ok(ListPage {
            keys,
            cursor: (next != 0).then(|| next.to_string()),
        })
    }
}
