//! Defines routes for all blob-store operations.
//!
//! ## Structure
//! - **Directory endpoints**
//!   - `GET    /blobs` — list stored objects (supports max-keys, start-after)
//!   - `PUT    /blobs` — ingest a blob (body streamed, identifier = content digest)
//!
//! - **Object endpoints**
//!   - `GET    /blobs/{id}` — stream a complete object's bytes
//!   - `HEAD   /blobs/{id}` — metadata headers only
//!   - `DELETE /blobs/{id}` — remove metadata and all shards
//!
//! Identifiers are content hashes, so keys are flat (no nesting).

use crate::handlers::{
    AppState,
    blob_handlers::{delete_blob, get_blob, head_blob, list_blobs, upload_blob},
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    routing::get,
};

/// Build and return the router for all blob-store routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // directory-level routes
        .route("/blobs", get(list_blobs).put(upload_blob))
        // object-level routes
        .route(
            "/blobs/{id}",
            get(get_blob).head(head_blob).delete(delete_blob),
        )
}
