//! SQLite-backed shard store.
//!
//! Two tables stand in for the backend's two attribute groups: `objects`
//! holds the metadata fields keyed by identifier, `shards` holds payloads
//! keyed by (identifier, shard_index). The status state machine is encoded
//! as a single byte column and decoded exhaustively on read.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};

use super::{ShardStore, StoreError, StoreResult};
use crate::models::metadata::{ObjectMetadata, ObjectStatus};

/// Shard store backed by a shared SQLite connection pool.
#[derive(Clone)]
pub struct SqliteShardStore {
    pool: Arc<SqlitePool>,
}

/// Raw `objects` row; integer columns are widened to SQLite's native i64
/// and narrowed (with validation) when converted to the domain record.
#[derive(FromRow)]
struct ObjectRow {
    identifier: String,
    description: String,
    size_bytes: i64,
    shard_count: i64,
    status: i64,
    created_at: DateTime<Utc>,
}

impl ObjectRow {
    fn into_metadata(self) -> StoreResult<ObjectMetadata> {
        let status_byte = u8::try_from(self.status).map_err(|_| StoreError::CorruptRecord {
            identifier: self.identifier.clone(),
            reason: format!("status column out of range: {}", self.status),
        })?;
        let status = ObjectStatus::from_byte(status_byte).ok_or_else(|| {
            StoreError::CorruptRecord {
                identifier: self.identifier.clone(),
                reason: format!("unknown status byte: {}", status_byte),
            }
        })?;
        Ok(ObjectMetadata {
            identifier: self.identifier,
            description: self.description,
            size_bytes: self.size_bytes.max(0) as u64,
            shard_count: self.shard_count.max(0) as u32,
            status,
            created_at: self.created_at,
        })
    }
}

impl SqliteShardStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShardStore for SqliteShardStore {
    async fn get_metadata(&self, identifier: &str) -> StoreResult<Option<ObjectMetadata>> {
        let row = sqlx::query_as::<Sqlite, ObjectRow>(
            "SELECT identifier, description, size_bytes, shard_count, status, created_at
             FROM objects WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(ObjectRow::into_metadata).transpose()
    }

    async fn put_metadata(&self, meta: &ObjectMetadata) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO objects (identifier, description, size_bytes, shard_count, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(identifier) DO UPDATE SET
                 description = excluded.description,
                 size_bytes = excluded.size_bytes,
                 shard_count = excluded.shard_count,
                 status = excluded.status",
        )
        .bind(&meta.identifier)
        .bind(&meta.description)
        .bind(meta.size_bytes as i64)
        .bind(meta.shard_count as i64)
        .bind(meta.status.as_byte() as i64)
        .bind(meta.created_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn put_shard(&self, identifier: &str, index: u32, payload: Bytes) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO shards (identifier, shard_index, payload) VALUES (?, ?, ?)
             ON CONFLICT(identifier, shard_index) DO UPDATE SET payload = excluded.payload",
        )
        .bind(identifier)
        .bind(index as i64)
        .bind(payload.as_ref())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn get_shard(&self, identifier: &str, index: u32) -> StoreResult<Option<Bytes>> {
        let payload = sqlx::query_scalar::<Sqlite, Vec<u8>>(
            "SELECT payload FROM shards WHERE identifier = ? AND shard_index = ?",
        )
        .bind(identifier)
        .bind(index as i64)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(payload.map(Bytes::from))
    }

    async fn delete_object(&self, identifier: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM shards WHERE identifier = ?")
            .bind(identifier)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM objects WHERE identifier = ?")
            .bind(identifier)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn scan_page(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ObjectMetadata>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT identifier, description, size_bytes, shard_count, status, created_at \
             FROM objects",
        );
        if let Some(cursor) = start_after {
            builder.push(" WHERE identifier > ");
            builder.push_bind(cursor);
        }
        builder.push(" ORDER BY identifier ASC LIMIT ");
        builder.push_bind(limit as i64);

        let rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.pool).await?;
        rows.into_iter().map(ObjectRow::into_metadata).collect()
    }
}
