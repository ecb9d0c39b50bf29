//! Durable key-value storage for the outbox.
//!
//! # Architecture
//!
//! The outbox only needs "get / replace / remove a document by key". The
//! backend abstraction supports:
//!
//! - `MemoryKvStore`: In-memory storage using DashMap
//! - `FileKvStore`: One JSON document per key on the local filesystem (default)
//! - `RedisKvStore`: String values in Redis
//!
//! Use `create_kv_store()` to create the appropriate backend based on configuration.

pub mod backend;
mod factory;
pub mod file_backend;
pub mod memory_backend;
pub mod redis_backend;

pub use backend::{KeyValueStore, StorageError};
pub use factory::create_kv_store;
pub use file_backend::FileKvStore;
pub use memory_backend::MemoryKvStore;
pub use redis_backend::RedisKvStore;
