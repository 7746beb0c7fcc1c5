//! hoard-server: wires configuration, the storage adapter and the HTTP
//! surface together.

pub mod config;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use hoard_axum::HoardApp;
use hoard_blob::{AdapterFactory, BackendKind, StorageAdapter};
use hoard_core::HoardConfig;
use tokio::task::JoinHandle;
use tracing::info;

/// A fully wired server, ready to listen
pub struct Hoard {
    pub app: HoardApp,
    pub adapter: Arc<StorageAdapter>,
    pub factory: Arc<AdapterFactory>,
    pub addr: String,
}

/// Build the server for the configured backend and metadata store.
pub async fn build(config: &HoardConfig) -> Result<Hoard> {
    let snapshot = config.snapshot();
    let kind = config::backend_kind(&snapshot)?;
    let meta = config::metadata_store(&snapshot).await?;

    let mut factory = AdapterFactory::new(meta, config::blob_config(&snapshot));
    if let Some(bucket) = config::bucket_config(&snapshot) {
        factory = factory.with_bucket(bucket);
    }
    if let Some(relay) = config::relay_config(&snapshot) {
        factory = factory.with_relay(relay);
    }

    build_with_factory(factory, kind, config::http_addr(&snapshot)).await
}

/// Build around an already assembled factory.
pub async fn build_with_factory(factory: AdapterFactory, kind: BackendKind, addr: String) -> Result<Hoard> {
    let factory = Arc::new(factory);
    let adapter = factory.adapter(kind).await?;
    info!("Storage backend: {} ({})", kind, adapter.backend_name());

    Ok(Hoard {
        app: HoardApp::new(adapter.clone()),
        adapter,
        factory,
        addr,
    })
}

/// Run the trash reaper for `adapter` on the current runtime.
pub fn spawn_reaper(adapter: &StorageAdapter) -> JoinHandle<()> {
    tokio::spawn(adapter.reaper().start())
}

impl Hoard {
    /// Serve until `shutdown` resolves, then stop the reaper and wait for
    /// background chunk persistence to finish.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reaper = spawn_reaper(&self.adapter);

        let served = self.app.listen_with_shutdown(self.addr, shutdown).await;

        reaper.abort();
        info!("Draining background uploads");
        self.factory.drain().await;
        served
    }
}
