//! Backend adapter contract and its two implementations.
//!
//! # Responsibility
//! - Define the narrow CRUD + list interface every physical store implements.
//! - Resolve the configured backend into one shared adapter instance.
//!
//! # Invariants
//! - Repositories and the cache layer depend on `Backend` only, never on a
//!   concrete adapter.
//! - Each call performs at most one physical statement or HTTP request.
//! - Adapters never retry; classification of failures is left to callers.

mod query;
mod rest;
mod sqlite;

pub use query::{OrderBy, Predicate, Query, Record, Records, SortDirection};
pub use rest::{RestBackend, RestConfig, DEFAULT_TIMEOUT};
pub use sqlite::SqliteBackend;

use crate::config::{BackendKind, ConfigError, StoreConfig, ENV_REMOTE_URL};
use crate::error::StoreResult;
use crate::layer::OpenError;
use crate::model::entity::EntityKind;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// One physical store behind a uniform contract.
///
/// All methods block the calling thread. Implementations are shared across
/// request threads, so they must be `Send + Sync`.
pub trait Backend: Send + Sync {
    /// Which configured backend this adapter implements.
    fn kind(&self) -> BackendKind;

    fn get(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>>;

    /// Fails fast with `UnsupportedQuery` before reading anything when the
    /// query cannot be expressed.
    fn list(&self, entity: EntityKind, query: &Query) -> StoreResult<Records>;

    fn insert(&self, entity: EntityKind, record: &Record) -> StoreResult<String>;

    /// Applies `patch` and returns the full stored record.
    fn update(&self, entity: EntityKind, id: &str, patch: &Record) -> StoreResult<Record>;

    /// Applies `patch` only while the row still holds every `expected`
    /// field value, as one atomic write.
    ///
    /// `Ok(None)` when no row matches `id` and `expected` together; nothing
    /// is written then.
    fn update_if(
        &self,
        entity: EntityKind,
        id: &str,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<Record>>;

    fn delete(&self, entity: EntityKind, id: &str) -> StoreResult<()>;
}

/// Builds the adapter chosen by `config.backend`.
///
/// Called once per process by `DataLayer::open`; the returned instance is
/// shared read-only by every repository.
pub fn open_backend(config: &StoreConfig) -> Result<Arc<dyn Backend>, OpenError> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Embedded => Arc::new(SqliteBackend::open(&config.sqlite_path)?),
        BackendKind::Remote => {
            let remote = config
                .remote
                .as_ref()
                .ok_or(OpenError::Config(ConfigError::Missing(ENV_REMOTE_URL)))?;
            Arc::new(RestBackend::new(remote.clone()).map_err(OpenError::HttpClient)?)
        }
    };
    info!(
        "event=backend_selected module=store backend={}",
        backend.kind().as_str()
    );
    Ok(backend)
}

/// Runs one adapter call and emits a `backend_call` event for it.
pub(crate) fn observe<T>(
    backend: BackendKind,
    op: &'static str,
    entity: EntityKind,
    call: impl FnOnce() -> StoreResult<T>,
) -> StoreResult<T> {
    let started_at = Instant::now();
    let result = call();
    let duration_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(_) => debug!(
            "event=backend_call module=store backend={} op={op} entity={entity} status=ok duration_ms={duration_ms}",
            backend.as_str()
        ),
        Err(err) => warn!(
            "event=backend_call module=store backend={} op={op} entity={entity} status=error error_kind={} duration_ms={duration_ms} error={err}",
            backend.as_str(),
            err.kind().as_str()
        ),
    }
    result
}

/// Identifier carried inside a record, if any.
pub(crate) fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(|value| value.as_str())
}
