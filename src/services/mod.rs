//! Chunked-object services: the writer and reader that move bytes between
//! streams and fixed-size shards, the directory scanner, and the blob
//! service tying them together behind the ingestion/retrieval API.

pub mod blob_service;
pub mod chunk_reader;
pub mod chunk_writer;
pub mod scanner;

/// Fixed shard size used when none is configured.
pub const DEFAULT_SHARD_SIZE: usize = 1024 * 1024;

/// Default number of shard fetches a reader keeps in flight.
pub const DEFAULT_LOOK_AHEAD: usize = 2;

/// Default number of shard writes a writer keeps in flight.
pub const DEFAULT_WRITE_WINDOW: usize = 2;

/// Hard cap on concurrent shard operations per reader/writer instance,
/// regardless of the configured window.
pub const MAX_SHARD_WORKERS: usize = 5;

/// Concurrent uploads in a batch upload.
pub const UPLOAD_WORKERS: usize = 5;
