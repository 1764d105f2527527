//! JSON HTTP API over the document store and pipeline.
//!
//! Routes:
//! - `POST   /api/documents`               multipart upload (field `file`)
//! - `GET    /api/documents`               list, `?status=&uploadDate=`
//! - `GET    /api/documents/:id`           one record
//! - `DELETE /api/documents/:id`           remove record and stored file
//! - `POST   /api/documents/:id/retry`     re-queue a failed document
//! - `POST   /api/documents/retry-failed`  re-queue every failed document
//! - `GET    /api/stats`                   counts by status

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::orchestrator::Pipeline;
use crate::store::DocumentStore;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, config: ServerConfig) -> Self {
        Self {
            store: Arc::clone(pipeline.store()),
            pipeline,
            config: Arc::new(config),
        }
    }
}

/// Start the web server.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&state.config.upload_dir).await?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
