//! BlobService — the blob ingestion/retrieval API over a shard store.
//!
//! Identifiers are content-derived (streaming MD5 of the source file), so an
//! upload of already-stored content is skipped entirely, and a partial prior
//! attempt is deleted before re-ingestion. Downloads stream shards through a
//! temporary file renamed into place, so a failed download never leaves a
//! truncated destination behind.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use uuid::Uuid;

use super::chunk_reader::ChunkReader;
use super::chunk_writer::ChunkWriter;
use super::scanner::ObjectScanner;
use super::{
    DEFAULT_LOOK_AHEAD, DEFAULT_SHARD_SIZE, DEFAULT_WRITE_WINDOW, MAX_SHARD_WORKERS,
    UPLOAD_WORKERS,
};
use crate::models::metadata::ObjectMetadata;
use crate::store::{ShardStore, StoreError};

const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("object `{0}` is not completely stored")]
    ObjectIncomplete(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Cloneable handle over an injected shard store. Concurrent writers for
/// the same identifier are not supported; callers serialize uploads of
/// identical content themselves.
#[derive(Clone)]
pub struct BlobService {
    store: Arc<dyn ShardStore>,
    shard_size: usize,
    look_ahead: usize,
    write_window: usize,
}

impl BlobService {
    pub fn new(store: Arc<dyn ShardStore>) -> Self {
        Self {
            store,
            shard_size: DEFAULT_SHARD_SIZE,
            look_ahead: DEFAULT_LOOK_AHEAD,
            write_window: DEFAULT_WRITE_WINDOW,
        }
    }

    /// Override chunking limits. Windows are clamped to the worker cap.
    pub fn with_limits(mut self, shard_size: usize, look_ahead: usize, write_window: usize) -> Self {
        self.shard_size = shard_size.max(1);
        self.look_ahead = look_ahead.clamp(1, MAX_SHARD_WORKERS);
        self.write_window = write_window.clamp(1, MAX_SHARD_WORKERS);
        self
    }

    pub fn store(&self) -> Arc<dyn ShardStore> {
        Arc::clone(&self.store)
    }

    /// Metadata for `identifier`, or a fresh NEW record when none exists.
    pub async fn load_metadata(&self, identifier: &str) -> BlobResult<ObjectMetadata> {
        Ok(self
            .store
            .get_metadata(identifier)
            .await?
            .unwrap_or_else(|| ObjectMetadata::fresh(identifier, "")))
    }

    /// Metadata for `identifier`, failing when no record exists.
    pub async fn stat(&self, identifier: &str) -> BlobResult<ObjectMetadata> {
        self.store
            .get_metadata(identifier)
            .await?
            .ok_or_else(|| BlobError::ObjectNotFound(identifier.to_string()))
    }

    /// Ingest a local file, returning its content-derived identifier.
    ///
    /// Already-complete content is not re-ingested; a partial prior attempt
    /// (writer died mid-stream) is deleted and the whole object rewritten.
    pub async fn upload(&self, path: &Path) -> BlobResult<String> {
        let description = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.upload_with_description(path, &description).await
    }

    pub async fn upload_with_description(
        &self,
        path: &Path,
        description: &str,
    ) -> BlobResult<String> {
        let identifier = md5_hex(path).await?;
        let existing = self.load_metadata(&identifier).await?;
        if existing.is_complete() {
            debug!(identifier = %identifier, "content already stored, skipping ingestion");
            return Ok(identifier);
        }

        // Clear any partial remnant so shard indices start clean at 1.
        self.store.delete_object(&identifier).await?;

        let meta = ObjectMetadata::fresh(identifier.clone(), description);
        let mut writer = ChunkWriter::new(
            Arc::clone(&self.store),
            meta,
            self.shard_size,
            self.write_window,
        );

        let mut file = File::open(path).await?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
        }
        let meta = writer.close().await?;
        info!(
            identifier = %meta.identifier,
            size_bytes = meta.size_bytes,
            shards = meta.shard_count,
            "object stored"
        );
        Ok(identifier)
    }

    /// Ingest several files with at most `UPLOAD_WORKERS` running at once.
    /// Results come back in input order; one failure never aborts the rest.
    pub async fn upload_batch(&self, paths: Vec<PathBuf>) -> Vec<BlobResult<String>> {
        futures::stream::iter(paths.into_iter().map(|path| {
            let service = self.clone();
            async move { service.upload(&path).await }
        }))
        .buffered(UPLOAD_WORKERS)
        .collect()
        .await
    }

    /// A reader over a COMPLETE object's byte stream.
    pub async fn open_reader(&self, identifier: &str) -> BlobResult<ChunkReader> {
        let meta = self.stat(identifier).await?;
        ChunkReader::open(Arc::clone(&self.store), &meta, self.look_ahead)
    }

    /// Stream the object's bytes to `dest`. Fails without touching `dest`
    /// when the object does not exist or is not COMPLETE.
    pub async fn download(&self, identifier: &str, dest: &Path) -> BlobResult<ObjectMetadata> {
        let meta = self.stat(identifier).await?;
        let reader = ChunkReader::open(Arc::clone(&self.store), &meta, self.look_ahead)?;

        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".download-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut src = StreamReader::new(Box::pin(reader.into_stream()));
        let outcome = async {
            let copied = tokio::io::copy(&mut src, &mut file).await?;
            if copied != meta.size_bytes {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "object `{identifier}` truncated: got {copied} of {} bytes",
                        meta.size_bytes
                    ),
                ));
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = outcome {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, dest).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(dest).await?;
                fs::rename(&tmp_path, dest).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }
        Ok(meta)
    }

    /// Enumerate all stored objects' metadata.
    pub fn scan(&self) -> ObjectScanner {
        ObjectScanner::new(Arc::clone(&self.store))
    }

    /// Remove the object's metadata and every shard. Idempotent.
    pub async fn delete(&self, identifier: &str) -> BlobResult<()> {
        self.store.delete_object(identifier).await?;
        debug!(identifier = %identifier, "object deleted");
        Ok(())
    }
}

/// Streaming MD5 of a local file, lowercase hex.
async fn md5_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = md5::Context::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::ObjectStatus;
    use crate::store::memory::MemoryShardStore;

    const SHARD: usize = 8;

    fn service(store: &Arc<MemoryShardStore>) -> BlobService {
        BlobService::new(store.clone() as Arc<dyn ShardStore>).with_limits(SHARD, 2, 2)
    }

    async fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn round_trips_awkward_lengths_exactly() {
        let store = Arc::new(MemoryShardStore::new());
        let service = service(&store);
        let dir = tempfile::tempdir().unwrap();

        let lengths = [0, 1, SHARD - 1, SHARD, SHARD + 1, 3 * SHARD, 2 * SHARD + SHARD / 2];
        for (i, len) in lengths.into_iter().enumerate() {
            let content: Vec<u8> = (0..len).map(|j| (i + j) as u8).collect();
            let src = write_file(dir.path(), &format!("in-{i}"), &content).await;
            let identifier = service.upload(&src).await.unwrap();

            let dest = dir.path().join(format!("out-{i}"));
            let meta = service.download(&identifier, &dest).await.unwrap();
            assert_eq!(meta.size_bytes, len as u64);
            assert_eq!(fs::read(&dest).await.unwrap(), content);
        }
    }

    #[tokio::test]
    async fn upload_is_idempotent_for_identical_content() {
        let store = Arc::new(MemoryShardStore::new());
        let service = service(&store);
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "blob", &[42u8; SHARD * 4 + 3]).await;

        let first = service.upload(&src).await.unwrap();
        let puts_after_first = store.shard_put_count();
        let shards_after_first = service.stat(&first).await.unwrap().shard_count;

        let second = service.upload(&src).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.shard_put_count(), puts_after_first);
        assert_eq!(
            service.stat(&second).await.unwrap().shard_count,
            shards_after_first
        );
    }

    #[tokio::test]
    async fn partial_write_is_detectable_and_recoverable() {
        let store = Arc::new(MemoryShardStore::new());
        let service = service(&store);
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..SHARD * 5).map(|i| i as u8).collect();
        let src = write_file(dir.path(), "blob", &content).await;

        store.fail_shard_writes_from(3);
        let failed = service.upload(&src).await;
        assert!(failed.is_err());

        // Metadata records the failure honestly: in progress, count no
        // higher than what is retrievable.
        let identifier = md5_hex(&src).await.unwrap();
        let meta = service.stat(&identifier).await.unwrap();
        assert_eq!(meta.status, ObjectStatus::InProgress);
        assert!((meta.shard_count as usize) <= store.stored_shard_count(&identifier));

        // Download refuses the partial object and leaves no file behind.
        let dest = dir.path().join("out");
        let err = service.download(&identifier, &dest).await.unwrap_err();
        assert!(matches!(err, BlobError::ObjectIncomplete(_)));
        assert!(!dest.exists());

        // Delete + reupload round-trips.
        store.fail_shard_writes_from(0);
        service.delete(&identifier).await.unwrap();
        let again = service.upload(&src).await.unwrap();
        assert_eq!(again, identifier);
        service.download(&identifier, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), content);
    }

    #[tokio::test]
    async fn batch_upload_isolates_per_item_failures() {
        let store = Arc::new(MemoryShardStore::new());
        let service = service(&store);
        let dir = tempfile::tempdir().unwrap();

        let good_a = write_file(dir.path(), "a", b"alpha").await;
        let missing = dir.path().join("does-not-exist");
        let good_b = write_file(dir.path(), "b", b"bravo").await;

        let results = service
            .upload_batch(vec![good_a, missing, good_b])
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());

        // The failing item did not poison its neighbors.
        let dest = dir.path().join("out");
        let id = results[2].as_ref().unwrap();
        service.download(id, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"bravo");
    }

    #[tokio::test]
    async fn download_of_unknown_identifier_is_not_found() {
        let store = Arc::new(MemoryShardStore::new());
        let service = service(&store);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let err = service.download("feedface", &dest).await.unwrap_err();
        assert!(matches!(err, BlobError::ObjectNotFound(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn identifier_is_the_content_digest() {
        let store = Arc::new(MemoryShardStore::new());
        let service = service(&store);
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "hello", b"hello world").await;
        let identifier = service.upload(&src).await.unwrap();
        assert_eq!(identifier, format!("{:x}", md5::compute(b"hello world")));

        // Same bytes under a different name: same object.
        let twin = write_file(dir.path(), "other-name", b"hello world").await;
        assert_eq!(service.upload(&twin).await.unwrap(), identifier);
    }
}
