use crate::catalog::VideoCatalog;
use crate::config::HttpConfig;
use crate::error::HttpError;
use crate::pipeline::PipelineState;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{health_handler, list_videos_handler, video_handler};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) catalog: Arc<VideoCatalog>,
    pub(crate) pipeline: watch::Receiver<PipelineState>,
}

/// Read-only HTTP view of the video catalog
pub struct CatalogServer {
    pub(crate) config: HttpConfig,
    state: ServerState,
}

impl CatalogServer {
    pub fn new(
        config: HttpConfig,
        catalog: Arc<VideoCatalog>,
        pipeline: watch::Receiver<PipelineState>,
    ) -> Self {
        Self {
            config,
            state: ServerState { catalog, pipeline },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/list_videos", get(list_videos_handler))
            .route("/video/:id", get(video_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Claim the configured address so bind errors surface before serving
    pub async fn bind(self) -> Result<BoundCatalogServer, HttpError> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        info!("Starting catalog server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HttpError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        Ok(BoundCatalogServer {
            server: self,
            listener,
        })
    }
}

/// Catalog server holding its listening socket
pub struct BoundCatalogServer {
    server: CatalogServer,
    listener: TcpListener,
}

impl BoundCatalogServer {
    pub fn local_addr(&self) -> Result<SocketAddr, HttpError> {
        self.listener
            .local_addr()
            .map_err(|e| HttpError::StartupFailed {
                details: format!("No local address: {}", e),
            })
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), HttpError> {
        let addr = self.local_addr()?;
        info!("Catalog server listening on {}", addr);

        axum::serve(self.listener, self.server.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| HttpError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Catalog server stopped");
        Ok(())
    }
}
