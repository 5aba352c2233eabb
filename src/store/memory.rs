//! In-memory shard store.
//!
//! Used as an ephemeral backend and as the instrumented store the
//! concurrency and failure-injection tests are written against: it tracks
//! the high-water mark of concurrently outstanding shard operations and can
//! inject write failures and fetch delays per shard index.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ShardStore, StoreError, StoreResult};
use crate::models::metadata::{ObjectMetadata, ObjectStatus};

#[derive(Default)]
struct Inner {
    // BTreeMap gives the scan its native key order.
    objects: BTreeMap<String, ObjectMetadata>,
    shards: HashMap<(String, u32), Bytes>,
    // Every status ever saved per identifier, for monotonicity assertions.
    status_log: HashMap<String, Vec<ObjectStatus>>,
}

#[derive(Default)]
pub struct MemoryShardStore {
    inner: Mutex<Inner>,
    outstanding: AtomicUsize,
    peak_outstanding: AtomicUsize,
    shard_puts: AtomicU64,
    // 0 disables injection; otherwise put_shard fails for index >= this.
    fail_writes_at: AtomicU32,
    shard_op_delay: Mutex<Option<Duration>>,
    even_fetch_delay: Mutex<Option<Duration>>,
}

/// Tracks one outstanding shard operation for the duration of a call.
struct OpGuard<'a> {
    store: &'a MemoryShardStore,
}

impl<'a> OpGuard<'a> {
    fn enter(store: &'a MemoryShardStore) -> Self {
        let now = store.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak_outstanding.fetch_max(now, Ordering::SeqCst);
        Self { store }
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.store.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest number of shard reads/writes ever in flight at once.
    pub fn peak_shard_ops(&self) -> usize {
        self.peak_outstanding.load(Ordering::SeqCst)
    }

    /// Total `put_shard` calls accepted so far.
    pub fn shard_put_count(&self) -> u64 {
        self.shard_puts.load(Ordering::SeqCst)
    }

    /// Make every `put_shard` with `index >= from_index` fail.
    pub fn fail_shard_writes_from(&self, from_index: u32) {
        self.fail_writes_at.store(from_index, Ordering::SeqCst);
    }

    /// Delay every shard read and write, so overlapping operations actually
    /// overlap instead of completing before the next one is issued.
    pub fn set_shard_op_delay(&self, delay: Duration) {
        *self.shard_op_delay.lock().unwrap() = Some(delay);
    }

    /// Additionally delay fetches of even-indexed shards, forcing
    /// out-of-order fetch completion.
    pub fn set_even_fetch_delay(&self, delay: Duration) {
        *self.even_fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Statuses saved for `identifier`, oldest first.
    pub fn status_history(&self, identifier: &str) -> Vec<ObjectStatus> {
        self.inner
            .lock()
            .unwrap()
            .status_log
            .get(identifier)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of shards physically present for `identifier`.
    pub fn stored_shard_count(&self, identifier: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .shards
            .keys()
            .filter(|(id, _)| id == identifier)
            .count()
    }

    async fn apply_op_delay(&self) {
        let delay = *self.shard_op_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ShardStore for MemoryShardStore {
    async fn get_metadata(&self, identifier: &str) -> StoreResult<Option<ObjectMetadata>> {
        Ok(self.inner.lock().unwrap().objects.get(identifier).cloned())
    }

    async fn put_metadata(&self, meta: &ObjectMetadata) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .status_log
            .entry(meta.identifier.clone())
            .or_default()
            .push(meta.status);
        inner.objects.insert(meta.identifier.clone(), meta.clone());
        Ok(())
    }

    async fn put_shard(&self, identifier: &str, index: u32, payload: Bytes) -> StoreResult<()> {
        let _guard = OpGuard::enter(self);
        self.apply_op_delay().await;

        let fail_at = self.fail_writes_at.load(Ordering::SeqCst);
        if fail_at != 0 && index >= fail_at {
            return Err(StoreError::Unavailable(format!(
                "injected failure writing shard {index} of `{identifier}`"
            )));
        }

        self.shard_puts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .lock()
            .unwrap()
            .shards
            .insert((identifier.to_string(), index), payload);
        Ok(())
    }

    async fn get_shard(&self, identifier: &str, index: u32) -> StoreResult<Option<Bytes>> {
        let _guard = OpGuard::enter(self);
        self.apply_op_delay().await;
        if index % 2 == 0 {
            let delay = *self.even_fetch_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(self
            .inner
            .lock()
            .unwrap()
            .shards
            .get(&(identifier.to_string(), index))
            .cloned())
    }

    async fn delete_object(&self, identifier: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.remove(identifier);
        inner.shards.retain(|(id, _), _| id != identifier);
        Ok(())
    }

    async fn scan_page(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ObjectMetadata>> {
        let inner = self.inner.lock().unwrap();
        let page = match start_after {
            Some(cursor) => inner
                .objects
                .range::<str, _>((
                    std::ops::Bound::Excluded(cursor),
                    std::ops::Bound::Unbounded,
                ))
                .take(limit)
                .map(|(_, meta)| meta.clone())
                .collect(),
            None => inner
                .objects
                .values()
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(page)
    }
}
