use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::backend::{BlobBackend, BucketBackend, BucketConfig, RelayBackend, RelayConfig};
use crate::metadata::MetadataStore;
use crate::{BackendKind, BlobConfig, BlobError, BlobResult, StorageAdapter};

/// Builds one [`StorageAdapter`] per backend kind and hands out the same
/// instance on every later call.
pub struct AdapterFactory {
    meta: Arc<dyn MetadataStore>,
    config: BlobConfig,
    bucket: Option<BucketConfig>,
    relay: Option<RelayConfig>,
    prebuilt: HashMap<BackendKind, Arc<dyn BlobBackend>>,
    adapters: Mutex<HashMap<BackendKind, Arc<StorageAdapter>>>,
}

impl AdapterFactory {
    pub fn new(meta: Arc<dyn MetadataStore>, config: BlobConfig) -> Self {
        Self {
            meta,
            config,
            bucket: None,
            relay: None,
            prebuilt: HashMap::new(),
            adapters: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bucket(mut self, config: BucketConfig) -> Self {
        self.bucket = Some(config);
        self
    }

    pub fn with_relay(mut self, config: RelayConfig) -> Self {
        self.relay = Some(config);
        self
    }

    /// Serve `kind` from an already constructed backend
    pub fn with_backend(mut self, kind: BackendKind, backend: Arc<dyn BlobBackend>) -> Self {
        self.prebuilt.insert(kind, backend);
        self
    }

    /// The adapter for `kind`, constructing it on first use.
    pub async fn adapter(&self, kind: BackendKind) -> BlobResult<Arc<StorageAdapter>> {
        let mut adapters = self.adapters.lock().await;
        if let Some(existing) = adapters.get(&kind) {
            return Ok(existing.clone());
        }

        let backend = self.build_backend(kind).await?;
        let adapter = Arc::new(StorageAdapter::new(self.meta.clone(), backend, self.config.clone()));
        info!("Constructed storage adapter for {} backend", kind);
        adapters.insert(kind, adapter.clone());
        Ok(adapter)
    }

    async fn build_backend(&self, kind: BackendKind) -> BlobResult<Arc<dyn BlobBackend>> {
        if let Some(backend) = self.prebuilt.get(&kind) {
            return Ok(backend.clone());
        }
        match kind {
            BackendKind::Bucket => {
                let config = self
                    .bucket
                    .clone()
                    .ok_or_else(|| BlobError::invalid("bucket backend is not configured"))?;
                Ok(Arc::new(BucketBackend::connect(config).await?))
            }
            BackendKind::Relay => {
                let config = self
                    .relay
                    .clone()
                    .ok_or_else(|| BlobError::invalid("relay backend is not configured"))?;
                Ok(Arc::new(RelayBackend::new(config)?))
            }
        }
    }

    /// Wait for background work of every adapter built so far.
    pub async fn drain(&self) {
        let adapters: Vec<Arc<StorageAdapter>> = self.adapters.lock().await.values().cloned().collect();
        for adapter in adapters {
            adapter.drain().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::metadata::MemoryMetadataStore;

    #[tokio::test]
    async fn adapters_are_memoized_per_kind() {
        let factory = AdapterFactory::new(Arc::new(MemoryMetadataStore::new()), BlobConfig::default())
            .with_backend(BackendKind::Bucket, Arc::new(MemoryBackend::new()))
            .with_backend(BackendKind::Relay, Arc::new(MemoryBackend::relay_like(1024)));

        let a = factory.adapter(BackendKind::Bucket).await.unwrap();
        let b = factory.adapter(BackendKind::Bucket).await.unwrap();
        let relay = factory.adapter(BackendKind::Relay).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &relay));
        assert_eq!(relay.capabilities().max_object_size, Some(1024));
        assert!(format!("{relay:?}").contains("max_object_size: Some(1024)"));
    }

    #[tokio::test]
    async fn unconfigured_backend_is_an_error() {
        let factory = AdapterFactory::new(Arc::new(MemoryMetadataStore::new()), BlobConfig::default());
        let Err(err) = factory.adapter(BackendKind::Relay).await else {
            panic!("built an adapter for an unconfigured backend");
        };
        assert!(matches!(err, BlobError::Invalid { .. }));
    }

    #[tokio::test]
    async fn relay_is_built_from_config() {
        let factory = AdapterFactory::new(Arc::new(MemoryMetadataStore::new()), BlobConfig::default())
            .with_relay(RelayConfig::new("token", "-1001").with_max_object_bytes(512));
        let adapter = factory.adapter(BackendKind::Relay).await.unwrap();
        assert_eq!(adapter.backend_name(), "relay");
        assert!(!adapter.capabilities().supports_range);
    }
}
