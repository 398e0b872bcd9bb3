//! Cache-aside tier in front of the configured backend.
//!
//! # Responsibility
//! - Hold non-authoritative serialized copies of records and list results.
//! - Invalidate affected keys after every successful write.
//!
//! # Invariants
//! - Cache failures are logged and swallowed; they never reach callers and
//!   are never retried.
//! - Keys always carry the backend name so embedded and remote copies never
//!   collide in a shared cache.

mod cached_store;
mod memory;
mod redis_store;

pub use cached_store::CachedStore;
pub use memory::{MemoryCacheStore, NoopCacheStore};
pub use redis_store::RedisCacheStore;

use crate::config::{CacheConfig, CacheTarget};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store holding serialized JSON text.
pub trait CacheStore: Send + Sync {
    /// Short name used in log events.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    fn delete(&self, keys: &[String]) -> CacheResult<()>;

    /// Removes every key starting with `prefix`.
    fn delete_prefix(&self, prefix: &str) -> CacheResult<()>;
}

#[derive(Debug)]
pub enum CacheError {
    Redis(redis::RedisError),
    /// Internal lock poisoned by a panicking thread.
    Poisoned,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis(err) => write!(f, "redis: {err}"),
            Self::Poisoned => write!(f, "cache lock poisoned"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Redis(err) => Some(err),
            Self::Poisoned => None,
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self::Redis(value)
    }
}

/// Builds the store named by `config.target`.
///
/// Only a malformed Redis URL fails here; an unreachable server is tolerated
/// and shows up later as logged cache misses.
pub fn open_cache_store(config: &CacheConfig) -> CacheResult<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match &config.target {
        CacheTarget::Disabled => Arc::new(NoopCacheStore),
        CacheTarget::Memory => Arc::new(MemoryCacheStore::new()),
        CacheTarget::Redis(url) => Arc::new(RedisCacheStore::open(url)?),
    };
    Ok(store)
}
