use edp_store::cache::{CacheError, CacheResult};
use edp_store::{
    Backend, BackendKind, CacheStore, DataLayer, EntityKind, ErrorKind, MemoryCacheStore,
    PaymentMilestone, Project, Query, Record, Records, RedisCacheStore, SqliteBackend,
    StoreResult,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

/// Delegates to SQLite and counts reads that reach the backend.
struct CountingBackend {
    inner: SqliteBackend,
    gets: AtomicUsize,
    lists: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: SqliteBackend::in_memory().unwrap(),
            gets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn get(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(entity, id)
    }

    fn list(&self, entity: EntityKind, query: &Query) -> StoreResult<Records> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(entity, query)
    }

    fn insert(&self, entity: EntityKind, record: &Record) -> StoreResult<String> {
        self.inner.insert(entity, record)
    }

    fn update(&self, entity: EntityKind, id: &str, patch: &Record) -> StoreResult<Record> {
        self.inner.update(entity, id, patch)
    }

    fn update_if(
        &self,
        entity: EntityKind,
        id: &str,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<Record>> {
        self.inner.update_if(entity, id, expected, patch)
    }

    fn delete(&self, entity: EntityKind, id: &str) -> StoreResult<()> {
        self.inner.delete(entity, id)
    }
}

/// Parks the next milestone read after it left the backend until the test
/// releases it.
struct PausingBackend {
    inner: SqliteBackend,
    armed: AtomicBool,
    reached: Mutex<mpsc::Sender<()>>,
    resume: Mutex<mpsc::Receiver<()>>,
}

impl PausingBackend {
    fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let backend = Self {
            inner: SqliteBackend::in_memory().unwrap(),
            armed: AtomicBool::new(false),
            reached: Mutex::new(reached_tx),
            resume: Mutex::new(resume_rx),
        };
        (backend, reached_rx, resume_tx)
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl Backend for PausingBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn get(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        let found = self.inner.get(entity, id);
        if entity == EntityKind::PaymentMilestone && self.armed.swap(false, Ordering::SeqCst) {
            self.reached.lock().unwrap().send(()).unwrap();
            self.resume.lock().unwrap().recv().unwrap();
        }
        found
    }

    fn list(&self, entity: EntityKind, query: &Query) -> StoreResult<Records> {
        self.inner.list(entity, query)
    }

    fn insert(&self, entity: EntityKind, record: &Record) -> StoreResult<String> {
        self.inner.insert(entity, record)
    }

    fn update(&self, entity: EntityKind, id: &str, patch: &Record) -> StoreResult<Record> {
        self.inner.update(entity, id, patch)
    }

    fn update_if(
        &self,
        entity: EntityKind,
        id: &str,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<Record>> {
        self.inner.update_if(entity, id, expected, patch)
    }

    fn delete(&self, entity: EntityKind, id: &str) -> StoreResult<()> {
        self.inner.delete(entity, id)
    }
}

/// Cache that fails every call.
struct BrokenCache;

impl CacheStore for BrokenCache {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Poisoned)
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Poisoned)
    }

    fn delete(&self, _keys: &[String]) -> CacheResult<()> {
        Err(CacheError::Poisoned)
    }

    fn delete_prefix(&self, _prefix: &str) -> CacheResult<()> {
        Err(CacheError::Poisoned)
    }
}

/// Cache whose stored values are garbage.
#[derive(Default)]
struct CorruptCache {
    keys: Mutex<HashMap<String, ()>>,
}

impl CacheStore for CorruptCache {
    fn name(&self) -> &'static str {
        "corrupt"
    }

    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys.get(key).map(|_| "{not json".to_string()))
    }

    fn set(&self, key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        self.keys.lock().unwrap().insert(key.to_string(), ());
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> CacheResult<()> {
        let mut stored = self.keys.lock().unwrap();
        for key in keys {
            stored.remove(key);
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.keys.lock().unwrap().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

fn seeded(layer: &DataLayer) -> (Project, PaymentMilestone) {
    let project = Project::new("Hospital wing", None);
    layer.projects().insert(&project).unwrap();
    let milestone = PaymentMilestone::new(project.id, 1_500_000, "CLP");
    layer.milestones().insert(&milestone).unwrap();
    (project, milestone)
}

#[test]
fn cache_hit_skips_the_backend() {
    let backend = Arc::new(CountingBackend::new());
    let layer = DataLayer::from_parts(backend.clone(), Arc::new(MemoryCacheStore::new()), TTL);
    let (project, milestone) = seeded(&layer);

    assert_eq!(layer.milestones().require(milestone.id).unwrap(), milestone);
    assert_eq!(layer.milestones().require(milestone.id).unwrap(), milestone);
    assert_eq!(backend.gets(), 1);

    assert_eq!(layer.milestones().for_project(project.id).unwrap().len(), 1);
    assert_eq!(layer.milestones().for_project(project.id).unwrap().len(), 1);
    assert_eq!(backend.lists(), 1);
}

#[test]
fn missing_rows_are_not_cached() {
    let backend = Arc::new(CountingBackend::new());
    let layer = DataLayer::from_parts(backend.clone(), Arc::new(MemoryCacheStore::new()), TTL);
    let id = uuid::Uuid::new_v4();

    assert!(layer.projects().get(id).unwrap().is_none());
    assert!(layer.projects().get(id).unwrap().is_none());
    assert_eq!(backend.gets(), 2);
}

#[test]
fn update_after_cached_read_never_returns_the_old_value() {
    let cache = Arc::new(MemoryCacheStore::new());
    let layer = DataLayer::from_parts(
        Arc::new(SqliteBackend::in_memory().unwrap()),
        cache,
        TTL,
    );
    let (project, milestone) = seeded(&layer);

    layer.milestones().require(milestone.id).unwrap();
    layer.milestones().for_project(project.id).unwrap();

    let patch = json!({"amount": 2_000_000}).as_object().cloned().unwrap();
    layer.milestones().update(milestone.id, &patch).unwrap();

    assert_eq!(layer.milestones().require(milestone.id).unwrap().amount, 2_000_000);
    assert_eq!(
        layer.milestones().for_project(project.id).unwrap()[0].amount,
        2_000_000
    );

    layer.milestones().delete(milestone.id).unwrap();
    assert!(layer.milestones().get(milestone.id).unwrap().is_none());
    assert!(layer.milestones().for_project(project.id).unwrap().is_empty());
}

#[test]
fn slow_read_never_caches_a_row_older_than_a_later_write() {
    let (backend, reached, resume) = PausingBackend::new();
    let backend = Arc::new(backend);
    let layer = DataLayer::from_parts(backend.clone(), Arc::new(MemoryCacheStore::new()), TTL);
    let (_, milestone) = seeded(&layer);

    backend.arm();
    thread::scope(|scope| {
        let reader = scope.spawn(|| layer.milestones().require(milestone.id).unwrap().amount);
        reached.recv().unwrap();

        let patch = json!({"amount": 2_000_000}).as_object().cloned().unwrap();
        layer.milestones().update(milestone.id, &patch).unwrap();

        resume.send(()).unwrap();
        assert_eq!(reader.join().unwrap(), 1_500_000);
    });

    assert_eq!(layer.milestones().require(milestone.id).unwrap().amount, 2_000_000);
}

#[test]
fn failing_cache_never_surfaces_errors() {
    let backend = Arc::new(CountingBackend::new());
    let layer = DataLayer::from_parts(backend.clone(), Arc::new(BrokenCache), TTL);
    let (project, milestone) = seeded(&layer);

    assert_eq!(layer.milestones().require(milestone.id).unwrap(), milestone);
    assert_eq!(layer.milestones().require(milestone.id).unwrap(), milestone);
    assert_eq!(backend.gets(), 2);

    let patch = json!({"currency": "USD"}).as_object().cloned().unwrap();
    layer.milestones().update(milestone.id, &patch).unwrap();
    assert_eq!(layer.projects().for_client(uuid::Uuid::new_v4()).unwrap().len(), 0);
    layer.projects().require(project.id).unwrap();
}

#[test]
fn undecodable_cache_entries_fall_back_to_the_backend() {
    let backend = Arc::new(CountingBackend::new());
    let layer = DataLayer::from_parts(backend.clone(), Arc::new(CorruptCache::default()), TTL);
    let (_, milestone) = seeded(&layer);

    layer.milestones().require(milestone.id).unwrap();
    assert_eq!(layer.milestones().require(milestone.id).unwrap(), milestone);
    assert_eq!(backend.gets(), 2);
}

#[test]
fn unreachable_redis_degrades_to_direct_reads() {
    let cache = Arc::new(RedisCacheStore::open("redis://127.0.0.1:1/").unwrap());
    let layer = DataLayer::from_parts(Arc::new(SqliteBackend::in_memory().unwrap()), cache, TTL);
    let (project, milestone) = seeded(&layer);

    assert_eq!(layer.milestones().require(milestone.id).unwrap(), milestone);
    assert_eq!(layer.milestones().for_project(project.id).unwrap().len(), 1);
    layer.milestones().delete(milestone.id).unwrap();
    assert_eq!(
        layer.milestones().require(milestone.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
