use std::future::Future;
use std::sync::Arc;

use axum::Router;
use hoard_blob::StorageAdapter;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{routes, HoardState};

#[derive(Clone)]
pub struct HoardApp {
    pub state: HoardState,
    routes: Router<()>,
}

impl HoardApp {
    pub fn new(adapter: Arc<StorageAdapter>) -> Self {
        Self::with_state(HoardState::new(adapter))
    }

    pub fn with_state(state: HoardState) -> Self {
        Self {
            routes: routes::router(state.clone()),
            state,
        }
    }

    /// Mount extra routes next to the storage API.
    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        self.routes = self.routes.nest(path, router);
        self
    }

    /// The full router with request-id, tracing and CORS layers.
    pub fn router(&self) -> Router<()> {
        self.routes.clone().layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        self.listen_with_shutdown(addr, std::future::pending()).await
    }

    /// Serve until `signal` resolves, then stop accepting and let in-flight
    /// requests finish.
    pub async fn listen_with_shutdown<A, F>(self, addr: A, signal: F) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}

pub fn hoard(adapter: Arc<StorageAdapter>) -> HoardApp {
    HoardApp::new(adapter)
}
