use std::time::Duration;

use crate::retry::RetryPolicy;

/// Which blob backend an adapter is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// S3-compatible object bucket (native range reads, no object cap)
    Bucket,
    /// Bot-style messaging API used as blob storage (capped, no range reads)
    Relay,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Bucket => "bucket",
            BackendKind::Relay => "relay",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bucket" | "s3" => Ok(BackendKind::Bucket),
            "relay" | "telegram" => Ok(BackendKind::Relay),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for storage operations
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Largest declared size accepted by chunked `init`
    pub max_file_bytes: u64,

    /// Largest `totalChunks` accepted by chunked `init`
    pub max_chunks: u32,

    /// Ceiling for the whole-file path, applied on top of the backend's own cap
    pub max_whole_file_bytes: u64,

    /// Lifetime of a staged chunk awaiting persistence
    pub staging_ttl: Duration,

    /// Lifetime of a chunked upload's metadata until it completes
    pub init_ttl: Duration,

    /// How long a trashed entry survives before expiry
    pub trash_ttl: Duration,

    /// Backend push retry policy
    pub retry: RetryPolicy,

    /// Upper bound on concurrent background persistence tasks
    pub max_background_tasks: usize,

    /// Trash reaper tick
    pub reaper_interval: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            max_chunks: 1_000,
            max_whole_file_bytes: 5 * 1024 * 1024 * 1024, // 5GB
            staging_ttl: Duration::from_secs(60 * 60),
            init_ttl: Duration::from_secs(24 * 60 * 60),
            trash_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            retry: RetryPolicy::default(),
            max_background_tasks: 16,
            reaper_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl BlobConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn with_max_chunks(mut self, max: u32) -> Self {
        self.max_chunks = max;
        self
    }

    pub fn with_max_whole_file_bytes(mut self, bytes: u64) -> Self {
        self.max_whole_file_bytes = bytes;
        self
    }

    pub fn with_staging_ttl(mut self, ttl: Duration) -> Self {
        self.staging_ttl = ttl;
        self
    }

    pub fn with_init_ttl(mut self, ttl: Duration) -> Self {
        self.init_ttl = ttl;
        self
    }

    pub fn with_trash_ttl(mut self, ttl: Duration) -> Self {
        self.trash_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set background task concurrency (minimum 1)
    pub fn with_max_background_tasks(mut self, max: usize) -> Self {
        self.max_background_tasks = max.max(1);
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }
}
