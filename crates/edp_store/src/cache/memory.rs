//! In-process cache stores.
//!
//! # Responsibility
//! - `MemoryCacheStore`: a process-local map for single-process deployments
//!   and tests.
//! - `NoopCacheStore`: the disabled cache; every lookup misses.
//!
//! # Invariants
//! - Expired entries are never returned, even before they are evicted.
//! - Values are opaque text; no decoding happens here.

use super::{CacheError, CacheResult, CacheStore};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-process cache with per-entry expiry. Not shared between processes.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|(_, expires)| *expires > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> CacheResult<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> CacheResult<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

/// Always misses; every write succeeds and is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheStore;

impl CacheStore for NoopCacheStore {
    fn name(&self) -> &'static str {
        "none"
    }

    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    fn delete(&self, _keys: &[String]) -> CacheResult<()> {
        Ok(())
    }

    fn delete_prefix(&self, _prefix: &str) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheStore, MemoryCacheStore, NoopCacheStore};
    use std::time::Duration;

    #[test]
    fn expired_entries_read_as_missing() {
        let store = MemoryCacheStore::new();
        store.set("k", "v", Duration::from_millis(0)).unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn prefix_delete_leaves_other_keys() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_secs(60);
        store.set("embedded:edp:list:all", "[]", ttl).unwrap();
        store.set("embedded:edp:list:status=eq:\"paid\"", "[]", ttl).unwrap();
        store.set("embedded:edp:1", "{}", ttl).unwrap();

        store.delete_prefix("embedded:edp:list:").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("embedded:edp:1").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn noop_never_hits() {
        let store = NoopCacheStore;
        store.set("k", "v", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
