//! # Cache Infrastructure
//!
//! Key/value storage with per-entry TTL and LRU eviction.
//!
//! # Architecture
//!
//! ```text
//! CacheStore (async trait, byte payloads)
//!   ├── MemoryCache<Bytes>   <- sharded index-based LRU arenas
//!   └── RedisCacheStore      <- ConnectionManager, SCAN for patterns
//! ```
//!
//! [`MemoryCache`] is also usable directly with any `Clone` value type.
//! Serialization, retries and statistics above the store live in
//! [`CacheManager`](crate::application::services::cache_manager::CacheManager).

pub mod error;
pub mod glob;
pub mod lru;
pub mod memory;
pub mod redis_store;
pub mod traits;

pub use error::{CacheError, CacheResult};
pub use memory::{CacheConfig, CacheStats, MemoryCache};
pub use redis_store::{RedisCacheConfig, RedisCacheStore};
pub use traits::CacheStore;
