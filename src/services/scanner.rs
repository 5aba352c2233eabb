//! Batched enumeration of every stored object's metadata.

use std::sync::Arc;

use crate::models::metadata::ObjectMetadata;
use crate::store::{ShardStore, StoreResult};

/// Iterates all objects in the store's native key order, one keyset page at
/// a time. Not thread safe; one scanner per enumeration.
pub struct ObjectScanner {
    store: Arc<dyn ShardStore>,
    cursor: Option<String>,
    exhausted: bool,
}

impl ObjectScanner {
    pub fn new(store: Arc<dyn ShardStore>) -> Self {
        Self {
            store,
            cursor: None,
            exhausted: false,
        }
    }

    /// Resume enumeration strictly after `cursor` (an identifier from a
    /// previous batch).
    pub fn resume_after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// The next `size` objects at most. An empty batch means the scan is
    /// exhausted, and every later call stays empty.
    pub async fn next_batch(&mut self, size: usize) -> StoreResult<Vec<ObjectMetadata>> {
        if self.exhausted || size == 0 {
            return Ok(Vec::new());
        }
        let page = self.store.scan_page(self.cursor.as_deref(), size).await?;
        if page.len() < size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.identifier.clone());
        }
        Ok(page)
    }

    /// The next single object, `None` once the scan is exhausted.
    pub async fn next_one(&mut self) -> StoreResult<Option<ObjectMetadata>> {
        Ok(self.next_batch(1).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryShardStore;

    async fn store_with(ids: &[&str]) -> Arc<MemoryShardStore> {
        let store = Arc::new(MemoryShardStore::new());
        for id in ids {
            store
                .put_metadata(&ObjectMetadata::fresh(*id, ""))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn batches_walk_the_whole_directory_in_key_order() {
        let store = store_with(&["e", "b", "a", "d", "c", "g", "f"]).await;
        let mut scanner = ObjectScanner::new(store);

        let mut seen = Vec::new();
        loop {
            let batch = scanner.next_batch(3).await.unwrap();
            if batch.is_empty() {
                break;
            }
            assert!(batch.len() <= 3);
            seen.extend(batch.into_iter().map(|m| m.identifier));
        }
        assert_eq!(seen, ["a", "b", "c", "d", "e", "f", "g"]);

        // Exhausted scanners stay exhausted.
        assert!(scanner.next_batch(3).await.unwrap().is_empty());
        assert!(scanner.next_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_one_steps_through_singly() {
        let store = store_with(&["b", "a"]).await;
        let mut scanner = ObjectScanner::new(store);
        assert_eq!(scanner.next_one().await.unwrap().unwrap().identifier, "a");
        assert_eq!(scanner.next_one().await.unwrap().unwrap().identifier, "b");
        assert!(scanner.next_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_after_skips_earlier_identifiers() {
        let store = store_with(&["a", "b", "c"]).await;
        let mut scanner = ObjectScanner::new(store).resume_after(Some("a".into()));
        let batch = scanner.next_batch(10).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|m| m.identifier.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }
}
