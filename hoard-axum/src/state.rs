use std::sync::Arc;

use hoard_blob::StorageAdapter;

use crate::multipart::MultipartLimits;

/// Shared state behind every route
#[derive(Clone)]
pub struct HoardState {
    pub adapter: Arc<StorageAdapter>,
    pub limits: MultipartLimits,
}

impl HoardState {
    pub fn new(adapter: Arc<StorageAdapter>) -> Self {
        let limits = MultipartLimits::for_backend(adapter.config(), adapter.capabilities());
        Self { adapter, limits }
    }

    pub fn with_limits(mut self, limits: MultipartLimits) -> Self {
        self.limits = limits;
        self
    }
}
