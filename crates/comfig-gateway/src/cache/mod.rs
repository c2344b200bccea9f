//! Two-tier caching for gateway metadata.
//!
//! ## Architecture
//!
//! - **Durable tier (`CacheStore`)**: Redis, shared across instances and
//!   authoritative. Falls back to an in-memory `DashMap` store when Redis is
//!   disabled or unreachable.
//! - **Process tier (`ProcessCache`)**: a single lock-free slot holding the
//!   most recently assembled composite response, with a short TTL.
//!
//! ## Read path
//!
//! ```text
//! GET / → process slot (fresh?) → durable tier per resource → upstream
//!              <1µs                    ~5ms                    ~200ms
//! ```
//!
//! The tiers are not kept transactionally consistent. Concurrent instances
//! may briefly serve different process-tier snapshots.

pub mod process;
pub mod store;

pub use process::ProcessCache;
pub use store::{
    CacheError, CacheStore, CachedEntry, MemoryCacheStore, RedisCacheStore, create_cache_store,
};
