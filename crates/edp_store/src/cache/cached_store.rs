//! Cache-aside decorator over a backend.
//!
//! # Responsibility
//! - Serve point and list reads from the cache when possible.
//! - Remove every key a successful write could have made stale.
//!
//! # Invariants
//! - Writes reach the backend before any key is removed; keys are removed,
//!   never refreshed.
//! - A value read from the backend is only cached when no invalidation of
//!   its entity ran since the read started.
//! - Cache failures are logged and swallowed; callers only see backend
//!   results.

use super::{CacheStore, NoopCacheStore};
use crate::config::BackendKind;
use crate::error::StoreResult;
use crate::model::entity::EntityKind;
use crate::store::{Backend, Query, Record, Records};
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cache-aside decorator over one backend.
///
/// Reads consult the cache first; writes go to the backend and then remove
/// every key the write could have made stale.
pub struct CachedStore {
    backend: Arc<dyn Backend>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    /// Invalidation count per entity kind.
    generations: Mutex<HashMap<EntityKind, u64>>,
}

impl CachedStore {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            backend,
            cache,
            ttl,
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Decorator that never caches.
    pub fn uncached(backend: Arc<dyn Backend>) -> Self {
        Self::new(backend, Arc::new(NoopCacheStore), Duration::from_secs(1))
    }

    /// Reads straight from the backend, skipping and not populating the cache.
    pub fn get_fresh(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        self.backend.get(entity, id)
    }

    /// Drops the point key for `id` (when given) and every list key of
    /// `entity` and its dependents.
    pub fn invalidate(&self, entity: EntityKind, id: Option<&str>) {
        self.bump_generation(entity);

        if let Some(id) = id {
            let key = self.point_key(entity, id);
            if let Err(err) = self.cache.delete(std::slice::from_ref(&key)) {
                self.cache_failed("delete", &key, &err);
            }
        }
        let prefix = self.list_prefix(entity);
        if let Err(err) = self.cache.delete_prefix(&prefix) {
            self.cache_failed("delete_prefix", &prefix, &err);
        }
        for dependent in entity.dependents() {
            let prefix = self.entity_prefix(*dependent);
            if let Err(err) = self.cache.delete_prefix(&prefix) {
                self.cache_failed("delete_prefix", &prefix, &err);
            }
        }
    }

    fn entity_prefix(&self, entity: EntityKind) -> String {
        format!("{}:{}:", self.backend.kind().as_str(), entity.as_str())
    }

    fn point_key(&self, entity: EntityKind, id: &str) -> String {
        format!("{}{id}", self.entity_prefix(entity))
    }

    fn list_prefix(&self, entity: EntityKind) -> String {
        format!("{}list:", self.entity_prefix(entity))
    }

    /// Current invalidation count of `entity`; `None` when the counter lock
    /// is poisoned, which disables caching of fresh reads.
    fn generation(&self, entity: EntityKind) -> Option<u64> {
        let generations = self.generations.lock().ok()?;
        Some(generations.get(&entity).copied().unwrap_or(0))
    }

    // Bumped before any key is deleted, so a reader that cached before the
    // bump has its value removed by the deletes that follow.
    fn bump_generation(&self, entity: EntityKind) {
        let Ok(mut generations) = self.generations.lock() else {
            warn!("event=cache_error module=cache op=invalidate entity={entity} status=poisoned");
            return;
        };
        for kind in std::iter::once(entity).chain(entity.dependents().iter().copied()) {
            *generations.entry(kind).or_insert(0) += 1;
        }
    }

    fn read_cached(&self, key: &str) -> Option<Value> {
        let text = match self.cache.get(key) {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!("event=cache_lookup module=cache key={key} status=miss");
                return None;
            }
            Err(err) => {
                self.cache_failed("get", key, &err);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => {
                debug!("event=cache_lookup module=cache key={key} status=hit");
                Some(value)
            }
            Err(err) => {
                self.cache_failed("decode", key, &err);
                None
            }
        }
    }

    /// Caches a backend read of `entity` taken at generation `observed`,
    /// unless an invalidation ran in between.
    fn write_cached(&self, entity: EntityKind, observed: Option<u64>, key: &str, value: &Value) {
        let Some(observed) = observed else {
            return;
        };
        // Held across the set so no invalidation can slip between check and write.
        let Ok(generations) = self.generations.lock() else {
            return;
        };
        if generations.get(&entity).copied().unwrap_or(0) != observed {
            debug!("event=cache_store module=cache key={key} status=skipped_stale");
            return;
        }
        if let Err(err) = self.cache.set(key, &value.to_string(), self.ttl) {
            self.cache_failed("set", key, &err);
        }
    }

    fn cache_failed(&self, op: &str, key: &str, err: &dyn std::fmt::Display) {
        warn!(
            "event=cache_error module=cache store={} op={op} key={key} status=degraded error={err}",
            self.cache.name()
        );
    }
}

impl Backend for CachedStore {
    fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    fn get(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        let key = self.point_key(entity, id);
        if let Some(Value::Object(record)) = self.read_cached(&key) {
            return Ok(Some(record));
        }
        let observed = self.generation(entity);
        let found = self.backend.get(entity, id)?;
        if let Some(record) = &found {
            self.write_cached(entity, observed, &key, &Value::Object(record.clone()));
        }
        Ok(found)
    }

    fn list(&self, entity: EntityKind, query: &Query) -> StoreResult<Records> {
        query.check(entity)?;
        let key = format!("{}{}", self.list_prefix(entity), query.signature());
        if let Some(Value::Array(items)) = self.read_cached(&key) {
            let records: Option<Vec<Record>> = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .collect();
            if let Some(records) = records {
                return Ok(Records::from_vec(records));
            }
        }
        let observed = self.generation(entity);
        let records: Vec<Record> = self.backend.list(entity, query)?.collect();
        let cached = Value::Array(records.iter().cloned().map(Value::Object).collect());
        self.write_cached(entity, observed, &key, &cached);
        Ok(Records::from_vec(records))
    }

    fn insert(&self, entity: EntityKind, record: &Record) -> StoreResult<String> {
        let id = self.backend.insert(entity, record)?;
        self.invalidate(entity, Some(&id));
        Ok(id)
    }

    fn update(&self, entity: EntityKind, id: &str, patch: &Record) -> StoreResult<Record> {
        let updated = self.backend.update(entity, id, patch)?;
        self.invalidate(entity, Some(id));
        Ok(updated)
    }

    fn update_if(
        &self,
        entity: EntityKind,
        id: &str,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<Record>> {
        let updated = self.backend.update_if(entity, id, expected, patch)?;
        if updated.is_some() {
            self.invalidate(entity, Some(id));
        }
        Ok(updated)
    }

    fn delete(&self, entity: EntityKind, id: &str) -> StoreResult<()> {
        self.backend.delete(entity, id)?;
        self.invalidate(entity, Some(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::CachedStore;
    use crate::cache::{CacheStore, MemoryCacheStore};
    use crate::model::entity::EntityKind;
    use crate::store::{Backend, Query, SqliteBackend};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn keys_are_namespaced_by_backend_and_entity() {
        let memory = Arc::new(MemoryCacheStore::new());
        let store = CachedStore::new(
            Arc::new(SqliteBackend::in_memory().unwrap()),
            memory.clone(),
            Duration::from_secs(60),
        );
        assert_eq!(store.point_key(EntityKind::PaymentMilestone, "abc"), "embedded:edp:abc");
        assert_eq!(store.list_prefix(EntityKind::CostLine), "embedded:cost_line:list:");

        store.list(EntityKind::CostHeader, &Query::new()).unwrap().count();
        assert!(memory.get("embedded:cost_header:list:all").unwrap().is_some());
    }

    #[test]
    fn header_invalidation_drops_cost_line_keys() {
        let memory = Arc::new(MemoryCacheStore::new());
        let store = CachedStore::new(
            Arc::new(SqliteBackend::in_memory().unwrap()),
            memory.clone(),
            Duration::from_secs(60),
        );
        memory
            .set("embedded:cost_line:list:all", "[]", Duration::from_secs(60))
            .unwrap();
        memory
            .set("embedded:cost_line:x", "{}", Duration::from_secs(60))
            .unwrap();

        memory
            .set("embedded:cost_header:h1", "{}", Duration::from_secs(60))
            .unwrap();
        memory
            .set("embedded:edp:list:all", "[]", Duration::from_secs(60))
            .unwrap();

        store.invalidate(EntityKind::CostHeader, Some("h1"));
        assert_eq!(memory.len(), 1);
        assert!(memory.get("embedded:edp:list:all").unwrap().is_some());
    }

    #[test]
    fn reads_started_before_an_invalidation_are_not_cached() {
        let memory = Arc::new(MemoryCacheStore::new());
        let store = CachedStore::new(
            Arc::new(SqliteBackend::in_memory().unwrap()),
            memory.clone(),
            Duration::from_secs(60),
        );
        let value = serde_json::json!({"id": "h1"});

        let header_before = store.generation(EntityKind::CostHeader);
        let line_before = store.generation(EntityKind::CostLine);
        store.invalidate(EntityKind::CostHeader, Some("h1"));

        store.write_cached(EntityKind::CostHeader, header_before, "embedded:cost_header:h1", &value);
        store.write_cached(EntityKind::CostLine, line_before, "embedded:cost_line:l1", &value);
        assert!(memory.is_empty());

        let current = store.generation(EntityKind::CostHeader);
        store.write_cached(EntityKind::CostHeader, current, "embedded:cost_header:h1", &value);
        assert!(memory.get("embedded:cost_header:h1").unwrap().is_some());
    }
}
