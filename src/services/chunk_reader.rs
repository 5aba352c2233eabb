//! Chunked reader: reassembles an object's shards into an ordered byte
//! stream, overlapping shard fetches behind a bounded look-ahead window.
//!
//! Fetches run concurrently on spawned tasks but complete to the caller
//! strictly in index order; the consuming side blocks only on the shard
//! whose turn it is. Peak buffered memory is bounded by
//! (look-ahead × shard size), independent of object size.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::FuturesOrdered;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;

use super::MAX_SHARD_WORKERS;
use super::blob_service::BlobError;
use crate::models::metadata::ObjectMetadata;
use crate::store::{ShardStore, StoreError, StoreResult};

pub struct ChunkReader {
    store: Arc<dyn ShardStore>,
    identifier: String,
    /// Shard count recorded at open time; shards beyond it are invisible.
    shard_count: u32,
    look_ahead: usize,
    /// Next 1-based index to request.
    next_fetch: u32,
    in_flight: FuturesOrdered<JoinHandle<StoreResult<Option<Bytes>>>>,
    finished: bool,
}

impl ChunkReader {
    /// Open a reader against `meta`. Fails unless the object is COMPLETE;
    /// an object with only some shards must never be readable.
    pub fn open(
        store: Arc<dyn ShardStore>,
        meta: &ObjectMetadata,
        look_ahead: usize,
    ) -> Result<Self, BlobError> {
        if !meta.is_complete() {
            return Err(BlobError::ObjectIncomplete(meta.identifier.clone()));
        }
        Ok(Self {
            store,
            identifier: meta.identifier.clone(),
            shard_count: meta.shard_count,
            look_ahead: look_ahead.clamp(1, MAX_SHARD_WORKERS),
            next_fetch: 1,
            in_flight: FuturesOrdered::new(),
            finished: false,
        })
    }

    /// The next shard in index order, or `None` at end of stream. A shard
    /// index past the recorded count, or a missing or empty shard, is the
    /// end-of-stream sentinel, not an error.
    pub async fn next_shard(&mut self) -> StoreResult<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        self.fill_window();

        let Some(joined) = self.in_flight.next().await else {
            self.finished = true;
            return Ok(None);
        };
        let fetched = joined
            .map_err(|err| StoreError::Unavailable(format!("shard fetch task failed: {err}")))??;
        match fetched {
            Some(shard) if !shard.is_empty() => Ok(Some(shard)),
            _ => {
                self.finished = true;
                // Dropping the window abandons any speculative fetches.
                self.in_flight = FuturesOrdered::new();
                Ok(None)
            }
        }
    }

    /// Adapt into a byte stream for `StreamReader` / HTTP response bodies.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            match reader.next_shard().await {
                Ok(Some(shard)) => Ok(Some((shard, reader))),
                Ok(None) => Ok(None),
                Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
            }
        })
    }

    /// Top up the fetch window with the next indices in order.
    fn fill_window(&mut self) {
        while self.in_flight.len() < self.look_ahead && self.next_fetch <= self.shard_count {
            let index = self.next_fetch;
            self.next_fetch += 1;
            let store = Arc::clone(&self.store);
            let identifier = self.identifier.clone();
            self.in_flight
                .push_back(tokio::spawn(async move {
                    store.get_shard(&identifier, index).await
                }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::ObjectStatus;
    use crate::store::memory::MemoryShardStore;
    use std::time::Duration;

    async fn seeded_store(shards: &[&[u8]]) -> (Arc<MemoryShardStore>, ObjectMetadata) {
        let store = Arc::new(MemoryShardStore::new());
        let mut meta = ObjectMetadata::fresh("obj", "obj.bin").begin_write();
        for (i, payload) in shards.iter().enumerate() {
            store
                .put_shard("obj", (i + 1) as u32, Bytes::copy_from_slice(payload))
                .await
                .unwrap();
            meta = meta.record_shard(payload.len());
        }
        let meta = meta.complete(shards.iter().map(|s| s.len() as u64).sum());
        store.put_metadata(&meta).await.unwrap();
        (store, meta)
    }

    async fn read_all(reader: &mut ChunkReader) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(shard) = reader.next_shard().await.unwrap() {
            out.extend_from_slice(&shard);
        }
        out
    }

    #[tokio::test]
    async fn delivers_shards_in_order() {
        let (store, meta) = seeded_store(&[b"ab", b"cd", b"e"]).await;
        let mut reader = ChunkReader::open(store, &meta, 2).unwrap();
        assert_eq!(read_all(&mut reader).await, b"abcde");
        // Past end of stream it stays at end of stream.
        assert!(reader.next_shard().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refuses_incomplete_object() {
        let store = Arc::new(MemoryShardStore::new());
        let meta = ObjectMetadata::fresh("obj", "").begin_write();
        let result = ChunkReader::open(store as Arc<dyn ShardStore>, &meta, 2);
        assert!(matches!(result, Err(BlobError::ObjectIncomplete(_))));
    }

    #[tokio::test]
    async fn missing_shard_is_end_of_stream() {
        let (store, meta) = seeded_store(&[b"ab", b"cd", b"ef"]).await;
        // Claim a fourth shard that was never written.
        let mut lying = meta.clone();
        lying.shard_count = 4;
        let mut reader = ChunkReader::open(store, &lying, 2).unwrap();
        assert_eq!(read_all(&mut reader).await, b"abcdef");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn out_of_order_fetch_completion_does_not_reorder_bytes() {
        let shards: Vec<Vec<u8>> = (0u8..6).map(|i| vec![i; 3]).collect();
        let refs: Vec<&[u8]> = shards.iter().map(|s| s.as_slice()).collect();
        let (store, meta) = seeded_store(&refs).await;
        store.set_even_fetch_delay(Duration::from_millis(10));

        let mut reader = ChunkReader::open(store, &meta, 3).unwrap();
        let expected: Vec<u8> = shards.concat();
        assert_eq!(read_all(&mut reader).await, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn look_ahead_bounds_in_flight_fetches() {
        let shards: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; 4]).collect();
        let refs: Vec<&[u8]> = shards.iter().map(|s| s.as_slice()).collect();
        let (store, meta) = seeded_store(&refs).await;
        store.set_shard_op_delay(Duration::from_millis(3));

        let mut reader = ChunkReader::open(store.clone(), &meta, 2).unwrap();
        read_all(&mut reader).await;
        assert!(store.peak_shard_ops() <= 2, "look-ahead exceeded");
    }

    #[tokio::test]
    async fn zero_shard_object_reads_empty() {
        let store = Arc::new(MemoryShardStore::new());
        let meta = ObjectMetadata::fresh("obj", "").complete(0);
        assert_eq!(meta.status, ObjectStatus::Complete);
        store.put_metadata(&meta).await.unwrap();
        let mut reader = ChunkReader::open(store, &meta, 2).unwrap();
        assert!(read_all(&mut reader).await.is_empty());
    }
}
