use std::sync::Arc;

use anyhow::{bail, Result};
use hoard_blob::backend::{BucketConfig, RelayConfig};
use hoard_blob::metadata::{MemoryMetadataStore, MetadataStore};
use hoard_blob::{BackendKind, BlobConfig, RetryPolicy};
use hoard_core::{HoardConfig, HoardConfigSnapshot};
use tracing::warn;

/// Environment variables with this prefix override configuration keys
pub const ENV_PREFIX: &str = "HOARD__";

/// Defaults, then `HOARD__*` environment overrides.
pub fn load() -> HoardConfig {
    let mut config = defaults();
    config.load_env(ENV_PREFIX);
    config
}

pub fn defaults() -> HoardConfig {
    let mut config = HoardConfig::new();
    config.set_default("http.host", "127.0.0.1");
    config.set_default("http.port", "3030");
    config.set_default("storage.backend", "bucket");
    config.set_default("metadata.backend", "memory");
    config.set_default("bucket.region", "us-east-1");
    config.set_default("redis.namespace", "hoard");
    config
}

pub fn http_addr(config: &HoardConfigSnapshot) -> String {
    let host = config.get("http.host").unwrap_or("127.0.0.1");
    let port = config.get("http.port").unwrap_or("3030");
    format!("{host}:{port}")
}

pub fn backend_kind(config: &HoardConfigSnapshot) -> Result<BackendKind> {
    let raw = config.get("storage.backend").unwrap_or("bucket");
    raw.parse::<BackendKind>().map_err(anyhow::Error::msg)
}

/// Upload limits, TTLs, retry and task settings; unset keys keep defaults.
pub fn blob_config(config: &HoardConfigSnapshot) -> BlobConfig {
    let mut blob = BlobConfig::default();
    if let Some(v) = config.get_u64("upload.max_file_bytes") {
        blob = blob.with_max_file_bytes(v);
    }
    if let Some(v) = config.get_u32("upload.max_chunks") {
        blob = blob.with_max_chunks(v);
    }
    if let Some(v) = config.get_u64("upload.max_whole_file_bytes") {
        blob = blob.with_max_whole_file_bytes(v);
    }
    if let Some(v) = config.get_secs("upload.staging_ttl_secs") {
        blob = blob.with_staging_ttl(v);
    }
    if let Some(v) = config.get_secs("upload.init_ttl_secs") {
        blob = blob.with_init_ttl(v);
    }
    if let Some(v) = config.get_secs("trash.ttl_secs") {
        blob = blob.with_trash_ttl(v);
    }
    if let Some(v) = config.get_usize("tasks.max_concurrency") {
        blob = blob.with_max_background_tasks(v);
    }
    if let Some(v) = config.get_secs("reaper.interval_secs") {
        blob = blob.with_reaper_interval(v);
    }
    blob.with_retry(retry_policy(config))
}

fn retry_policy(config: &HoardConfigSnapshot) -> RetryPolicy {
    let defaults = RetryPolicy::default();
    let mut retry = RetryPolicy::new().with_backoff(
        config.get_millis("retry.base_backoff_ms").unwrap_or(defaults.base_backoff),
        config.get_millis("retry.max_backoff_ms").unwrap_or(defaults.max_backoff),
    );
    if let Some(v) = config.get_u32("retry.max_attempts") {
        retry = retry.with_max_attempts(v);
    }
    if let Some(v) = config.get_secs("retry.attempt_timeout_secs") {
        retry = retry.with_attempt_timeout(v);
    }
    retry
}

/// `None` when no bucket name is configured.
pub fn bucket_config(config: &HoardConfigSnapshot) -> Option<BucketConfig> {
    let bucket = config.get("bucket.name")?;
    let endpoint = config.get("bucket.endpoint").unwrap_or_default();
    let mut bucket = BucketConfig::new(endpoint, bucket)
        .with_region(config.get("bucket.region").unwrap_or("us-east-1"))
        .with_credentials(
            config.get("bucket.access_key").unwrap_or_default(),
            config.get("bucket.secret_key").unwrap_or_default(),
        );
    if let Some(prefix) = config.get("bucket.prefix") {
        bucket = bucket.with_prefix(prefix);
    }
    Some(bucket)
}

/// `None` unless both a bot token and a chat id are configured.
pub fn relay_config(config: &HoardConfigSnapshot) -> Option<RelayConfig> {
    let token = config.get("relay.bot_token")?;
    let chat = config.get("relay.chat_id")?;
    let mut relay = RelayConfig::new(token, chat);
    if let Some(base) = config.get("relay.api_base") {
        relay = relay.with_api_base(base);
    }
    if let Some(max) = config.get_u64("relay.max_object_bytes") {
        relay = relay.with_max_object_bytes(max);
    }
    Some(relay)
}

pub async fn metadata_store(config: &HoardConfigSnapshot) -> Result<Arc<dyn MetadataStore>> {
    match config.get("metadata.backend").unwrap_or("memory") {
        "memory" => {
            warn!("Using the in-memory metadata store; metadata is lost on restart");
            Ok(Arc::new(MemoryMetadataStore::new()))
        }
        "redis" => redis_store(config).await,
        other => bail!("unknown metadata.backend '{other}' (expected memory or redis)"),
    }
}

#[cfg(feature = "redis")]
async fn redis_store(config: &HoardConfigSnapshot) -> Result<Arc<dyn MetadataStore>> {
    use anyhow::Context;

    let url = config.get("redis.url").context("redis.url is required for the redis metadata store")?;
    let namespace = config.get("redis.namespace").unwrap_or("hoard");
    let store = hoard_blob::metadata::RedisMetadataStore::connect(url, namespace).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn redis_store(_config: &HoardConfigSnapshot) -> Result<Arc<dyn MetadataStore>> {
    bail!("metadata.backend = redis needs hoard-server built with the `redis` feature")
}
