//! Chunked writer: consumes an arbitrary-length byte stream, buffers it into
//! fixed-size shards, and persists the shards with a bounded number of
//! overlapping writes.
//!
//! Shard indices are assigned 1, 2, 3, … on the caller path only; the actual
//! writes run on spawned tasks collected in submission order, and metadata
//! (cumulative size and shard count) is saved only as each write completes
//! in that order. The recorded shard count therefore never exceeds the
//! contiguously persisted prefix, even while later shards are in flight.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::FuturesOrdered;
use tokio::task::JoinHandle;
use tracing::debug;

use super::MAX_SHARD_WORKERS;
use crate::models::metadata::{ObjectMetadata, ObjectStatus};
use crate::store::{ShardStore, StoreError, StoreResult};

/// Writer for one object. Not shareable: concurrent writers for the same
/// identifier must be serialized by the caller, and the metadata handed in
/// must describe an object with no persisted shards (delete first when
/// re-ingesting a partial object).
pub struct ChunkWriter {
    store: Arc<dyn ShardStore>,
    meta: ObjectMetadata,
    /// The object was already complete when the writer was opened; input is
    /// discarded and close() touches nothing.
    already_complete: bool,
    shard_size: usize,
    window: usize,
    buf: BytesMut,
    next_index: u32,
    total_bytes: u64,
    in_flight: FuturesOrdered<JoinHandle<StoreResult<usize>>>,
}

impl ChunkWriter {
    pub fn new(
        store: Arc<dyn ShardStore>,
        meta: ObjectMetadata,
        shard_size: usize,
        write_window: usize,
    ) -> Self {
        let already_complete = meta.is_complete();
        Self {
            store,
            meta,
            already_complete,
            shard_size: shard_size.max(1),
            window: write_window.clamp(1, MAX_SHARD_WORKERS),
            buf: BytesMut::new(),
            next_index: 1,
            total_bytes: 0,
            in_flight: FuturesOrdered::new(),
        }
    }

    /// Append input bytes, dispatching every shard that fills up. Blocks
    /// only when the in-flight window is full.
    pub async fn write(&mut self, data: &[u8]) -> StoreResult<()> {
        if self.already_complete {
            return Ok(());
        }
        self.buf.extend_from_slice(data);
        self.total_bytes += data.len() as u64;
        while self.buf.len() >= self.shard_size {
            let shard = self.buf.split_to(self.shard_size).freeze();
            self.dispatch(shard).await?;
        }
        Ok(())
    }

    /// Flush the partial trailing shard (the only shard allowed to be
    /// short), wait for every outstanding write, and mark the object
    /// complete. Returns the final metadata snapshot.
    pub async fn close(mut self) -> StoreResult<ObjectMetadata> {
        if self.already_complete {
            return Ok(self.meta);
        }
        if !self.buf.is_empty() {
            let shard = self.buf.split().freeze();
            self.dispatch(shard).await?;
        }
        while !self.in_flight.is_empty() {
            self.settle_next().await?;
        }
        self.meta = self.meta.clone().complete(self.total_bytes);
        self.store.put_metadata(&self.meta).await?;
        debug!(
            identifier = %self.meta.identifier,
            size_bytes = self.meta.size_bytes,
            shards = self.meta.shard_count,
            "object complete"
        );
        Ok(self.meta)
    }

    async fn dispatch(&mut self, shard: Bytes) -> StoreResult<()> {
        // The IN_PROGRESS record must be durable before the first shard
        // write is issued, so no shard can exist while metadata claims NEW.
        if self.meta.status == ObjectStatus::New {
            self.meta = self.meta.clone().begin_write();
            self.store.put_metadata(&self.meta).await?;
        }

        while self.in_flight.len() >= self.window {
            self.settle_next().await?;
        }

        let index = self.next_index;
        self.next_index += 1;
        let store = Arc::clone(&self.store);
        let identifier = self.meta.identifier.clone();
        let len = shard.len();
        self.in_flight.push_back(tokio::spawn(async move {
            store.put_shard(&identifier, index, shard).await?;
            Ok(len)
        }));
        Ok(())
    }

    /// Wait for the oldest in-flight write and fold it into metadata.
    async fn settle_next(&mut self) -> StoreResult<()> {
        let Some(joined) = self.in_flight.next().await else {
            return Ok(());
        };
        let shard_len = joined
            .map_err(|err| StoreError::Unavailable(format!("shard write task failed: {err}")))??;
        self.meta = self.meta.clone().record_shard(shard_len);
        self.store.put_metadata(&self.meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryShardStore;
    use std::time::Duration;

    fn writer(store: &Arc<MemoryShardStore>, shard_size: usize, window: usize) -> ChunkWriter {
        let meta = ObjectMetadata::fresh("obj", "obj.bin");
        ChunkWriter::new(store.clone() as Arc<dyn ShardStore>, meta, shard_size, window)
    }

    #[tokio::test]
    async fn two_and_a_half_shards() {
        let store = Arc::new(MemoryShardStore::new());
        let mut w = writer(&store, 4, 2);
        let payload = b"0123456789"; // 2.5 shards of 4 bytes
        w.write(payload).await.unwrap();
        let meta = w.close().await.unwrap();

        assert_eq!(meta.shard_count, 3);
        assert_eq!(meta.size_bytes, 10);
        assert_eq!(meta.status, ObjectStatus::Complete);
        assert_eq!(
            store.get_shard("obj", 3).await.unwrap().as_deref(),
            Some(b"89".as_ref())
        );
        assert_eq!(
            store.get_shard("obj", 1).await.unwrap().as_deref(),
            Some(b"0123".as_ref())
        );
    }

    #[tokio::test]
    async fn exact_multiple_has_no_short_shard() {
        let store = Arc::new(MemoryShardStore::new());
        let mut w = writer(&store, 4, 2);
        w.write(b"01234567").await.unwrap();
        let meta = w.close().await.unwrap();
        assert_eq!(meta.shard_count, 2);
        assert_eq!(meta.size_bytes, 8);
        assert!(store.get_shard("obj", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_object_completes_with_zero_shards() {
        let store = Arc::new(MemoryShardStore::new());
        let w = writer(&store, 4, 2);
        let meta = w.close().await.unwrap();
        assert_eq!(meta.shard_count, 0);
        assert_eq!(meta.size_bytes, 0);
        assert!(meta.is_complete());
    }

    #[tokio::test]
    async fn saved_statuses_never_regress() {
        let store = Arc::new(MemoryShardStore::new());
        let mut w = writer(&store, 4, 2);
        w.write(&[7u8; 19]).await.unwrap();
        w.close().await.unwrap();

        let history = store.status_history("obj");
        assert!(!history.is_empty());
        let mut last = 0u8;
        for status in history {
            assert!(status.as_byte() >= last, "status regressed");
            last = status.as_byte();
        }
        assert_eq!(last, ObjectStatus::Complete.as_byte());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_writes_stay_within_window() {
        let store = Arc::new(MemoryShardStore::new());
        store.set_shard_op_delay(Duration::from_millis(5));
        let mut w = writer(&store, 8, 2);
        w.write(&vec![1u8; 8 * 20]).await.unwrap();
        w.close().await.unwrap();
        assert!(store.peak_shard_ops() <= 2, "window exceeded");
    }

    #[tokio::test]
    async fn write_failure_leaves_in_progress_prefix() {
        let store = Arc::new(MemoryShardStore::new());
        store.fail_shard_writes_from(3);
        let mut w = writer(&store, 4, 1);
        let result = async {
            w.write(&[9u8; 4 * 5]).await?;
            w.close().await.map(|_| ())
        }
        .await;
        assert!(result.is_err());

        let meta = store.get_metadata("obj").await.unwrap().unwrap();
        assert_eq!(meta.status, ObjectStatus::InProgress);
        assert!(meta.shard_count <= 2);
        assert!(meta.shard_count as usize <= store.stored_shard_count("obj"));
    }

    #[tokio::test]
    async fn already_complete_object_is_untouched() {
        let store = Arc::new(MemoryShardStore::new());
        let done = ObjectMetadata::fresh("obj", "obj.bin")
            .begin_write()
            .record_shard(4)
            .complete(4);
        store.put_metadata(&done).await.unwrap();
        store
            .put_shard("obj", 1, Bytes::from_static(b"orig"))
            .await
            .unwrap();
        let puts_before = store.shard_put_count();

        let mut w = ChunkWriter::new(store.clone() as Arc<dyn ShardStore>, done.clone(), 4, 2);
        w.write(b"different bytes").await.unwrap();
        let meta = w.close().await.unwrap();

        assert_eq!(meta, done);
        assert_eq!(store.shard_put_count(), puts_before);
        assert_eq!(
            store.get_shard("obj", 1).await.unwrap().as_deref(),
            Some(b"orig".as_ref())
        );
    }
}
