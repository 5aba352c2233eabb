pub mod blob_handlers;
pub mod health_handlers;

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::blob_service::BlobService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub blobs: BlobService,
    /// Pool kept alongside the service for the readiness probe.
    pub db: Arc<SqlitePool>,
    /// Directory request bodies are spooled into before ingestion.
    pub spool_dir: PathBuf,
}
