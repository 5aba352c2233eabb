//! HTTP handlers for blob operations.
//!
//! Uploads are spooled to a temporary file first: the identifier is the
//! content digest, which must be known before the first shard is written.
//! Downloads stream shards straight out of the store without buffering the
//! whole object.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::AsyncWriteExt,
};
use uuid::Uuid;

use crate::{
    errors::AppError, handlers::AppState, models::metadata::ObjectMetadata,
    services::blob_service::BlobError,
};

/// Query params for `PUT /blobs`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Original file name to record as the object's description.
    pub name: Option<String>,
}

/// Query params for `GET /blobs`.
#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub objects: Vec<ObjectMetadata>,
    pub truncated: bool,
    pub next_start_after: Option<String>,
}

/// PUT `/blobs` — spool the body to disk, ingest it, return its metadata.
pub async fn upload_blob(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let spool_path = state
        .spool_dir
        .join(format!(".upload-{}", Uuid::new_v4()));
    let mut file = fs::File::create(&spool_path)
        .await
        .map_err(|err| AppError::internal(format!("creating spool file: {err}")))?;

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(&spool_path).await;
                return Err(AppError::new(
                    StatusCode::BAD_REQUEST,
                    format!("reading request body: {err}"),
                ));
            }
        };
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&spool_path).await;
            return Err(AppError::internal(format!("spooling request body: {err}")));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&spool_path).await;
        return Err(AppError::internal(format!("spooling request body: {err}")));
    }
    drop(file);

    let description = q.name.unwrap_or_default();
    let uploaded = state
        .blobs
        .upload_with_description(&spool_path, &description)
        .await;
    let _ = fs::remove_file(&spool_path).await;
    let identifier = uploaded?;

    let meta = state.blobs.stat(&identifier).await?;
    Ok((StatusCode::CREATED, Json(meta)))
}

/// GET `/blobs/{id}` — stream a complete object's bytes.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, AppError> {
    let meta = state.blobs.stat(&identifier).await?;
    let reader = state.blobs.open_reader(&identifier).await?;
    let body = Body::from_stream(reader.into_stream());

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/blobs/{id}` — same headers as GET but no body.
pub async fn head_blob(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, AppError> {
    let meta = state.blobs.stat(&identifier).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/blobs/{id}` — remove metadata and all shards.
pub async fn delete_blob(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.blobs.delete(&identifier).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/blobs` — one page of the object directory.
pub async fn list_blobs(
    State(state): State<AppState>,
    Query(q): Query<ScanQuery>,
) -> Result<Json<ScanResponse>, AppError> {
    let max_keys = q.max_keys.unwrap_or(1000).clamp(1, 1000);
    let mut scanner = state.blobs.scan().resume_after(q.start_after);
    let objects = scanner.next_batch(max_keys).await.map_err(BlobError::from)?;

    let truncated = objects.len() == max_keys;
    let next_start_after = if truncated {
        objects.last().map(|meta| meta.identifier.clone())
    } else {
        None
    };
    Ok(Json(ScanResponse {
        objects,
        truncated,
        next_start_after,
    }))
}

fn set_blob_headers(headers: &mut HeaderMap, meta: &ObjectMetadata) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&meta.created_at.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    if let Ok(value) = HeaderValue::from_str(&meta.shard_count.to_string()) {
        headers.insert("x-shardfs-shards", value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.description) {
        headers.insert("x-shardfs-name", value);
    }
}
