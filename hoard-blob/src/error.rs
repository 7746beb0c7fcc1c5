use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("Invalid range: {message}")]
    InvalidRange { message: String },

    #[error("Upload incomplete: {uploaded}/{total} chunks present")]
    IncompleteUpload { uploaded: u32, total: u32 },

    #[error("Size limit exceeded: {size} bytes (max: {max})")]
    SizeLimitExceeded { size: u64, max: u64 },

    #[error("Backend upload failed: {reason}")]
    BackendUploadFailure { reason: String },

    #[error("Backend read failed for {remote_id}: {reason}")]
    BackendReadFailure { remote_id: String, reason: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Operation not supported by this backend")]
    Unsupported,

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl BlobError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an invalid range error
    pub fn invalid_range<S: Into<String>>(message: S) -> Self {
        Self::InvalidRange {
            message: message.into(),
        }
    }

    /// Create an upload failure error
    pub fn upload_failed<S: Into<String>>(reason: S) -> Self {
        Self::BackendUploadFailure {
            reason: reason.into(),
        }
    }

    /// Create a read failure error
    pub fn read_failed<I: Into<String>, S: Into<String>>(remote_id: I, reason: S) -> Self {
        Self::BackendReadFailure {
            remote_id: remote_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Input and state errors never become valid by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUploadFailure { .. }
                | Self::BackendReadFailure { .. }
                | Self::Backend { .. }
                | Self::Timeout { .. }
                | Self::Io { .. }
        )
    }
}
