//! The shard-store contract: the narrow surface through which every other
//! component talks to the key-value backend.
//!
//! The backend is addressed by object identifier as the row key, with two
//! logical attribute groups: metadata fields and shard payloads (column =
//! 1-based shard index). Absence of a record is `None`, never an error.
//! This layer performs no retries or backoff; backend failures surface
//! unchanged to the caller.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::models::metadata::ObjectMetadata;

pub mod memory;
pub mod sqlite;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt metadata record for `{identifier}`: {reason}")]
    CorruptRecord { identifier: String, reason: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Backend contract consumed by the metadata manager, the chunked
/// reader/writer, and the scan adapter. Implementations must be safe to
/// share behind an `Arc` across worker tasks.
#[async_trait]
pub trait ShardStore: Send + Sync + 'static {
    /// Fetch the metadata record for `identifier`, if one exists.
    async fn get_metadata(&self, identifier: &str) -> StoreResult<Option<ObjectMetadata>>;

    /// Full overwrite of the metadata record. Idempotent.
    async fn put_metadata(&self, meta: &ObjectMetadata) -> StoreResult<()>;

    /// Persist one shard payload under (identifier, index). `index` is
    /// 1-based and never reused for an identifier unless the object is
    /// deleted first.
    async fn put_shard(&self, identifier: &str, index: u32, payload: Bytes) -> StoreResult<()>;

    /// Fetch one shard payload, `None` if it does not exist.
    async fn get_shard(&self, identifier: &str, index: u32) -> StoreResult<Option<Bytes>>;

    /// Remove the metadata record and every shard for `identifier`.
    /// Deleting an absent object is not an error.
    async fn delete_object(&self, identifier: &str) -> StoreResult<()>;

    /// One page of metadata records in the store's native key order,
    /// starting strictly after `start_after` when given. Returning fewer
    /// than `limit` records means the scan is exhausted.
    async fn scan_page(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ObjectMetadata>>;
}
