//! Bounded in-memory record cache.

pub mod memory_cache;

pub use memory_cache::{Cache, CacheConfig, CacheLookup};
