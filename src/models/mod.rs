//! Core data models for the chunked blob store.
//!
//! The only durable entity is the per-object metadata record; shard payloads
//! are raw bytes addressed by (identifier, shard index) and never get a model
//! of their own.

pub mod metadata;
