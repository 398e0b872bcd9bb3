//! Process-wide data layer handle.
//!
//! # Responsibility
//! - Build the configured backend and cache exactly once.
//! - Hand every repository the same immutable, shareable store.
//!
//! # Invariants
//! - One `DataLayer` binds to one backend for its whole lifetime.
//! - `DataLayer` is cheap to clone and safe to share across threads.

use crate::cache::{open_cache_store, CacheError, CacheStore, CachedStore};
use crate::config::{BackendKind, ConfigError, StoreConfig};
use crate::db::DbError;
use crate::model::cost::{CostHeader, CostLine};
use crate::model::ledger::{CashMovement, Issue, LogEntry};
use crate::model::project::{ClientProfile, Project};
use crate::repo::{MilestoneRepository, Repository, StatusHistoryRecorder};
use crate::store::{open_backend, Backend};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Startup failure while building a `DataLayer`.
#[derive(Debug)]
pub enum OpenError {
    Config(ConfigError),
    Db(DbError),
    HttpClient(reqwest::Error),
    Cache(CacheError),
}

impl Display for OpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Db(err) => write!(f, "embedded store error: {err}"),
            Self::HttpClient(err) => write!(f, "remote client setup failed: {err}"),
            Self::Cache(err) => write!(f, "cache setup failed: {err}"),
        }
    }
}

impl Error for OpenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::HttpClient(err) => Some(err),
            Self::Cache(err) => Some(err),
        }
    }
}

impl From<ConfigError> for OpenError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for OpenError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<CacheError> for OpenError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}

/// Entry point handing out repositories bound to one backend.
#[derive(Clone)]
pub struct DataLayer {
    store: Arc<CachedStore>,
}

impl DataLayer {
    /// Opens the backend and cache named by `config`.
    ///
    /// # Errors
    /// - `OpenError::Db` when the embedded store cannot be opened or migrated.
    /// - `OpenError::Config` when the remote settings are absent.
    /// - `OpenError::Cache` when the cache URL is malformed.
    pub fn open(config: &StoreConfig) -> Result<Self, OpenError> {
        let backend = open_backend(config)?;
        let cache = open_cache_store(&config.cache)?;
        info!(
            "event=data_layer_open module=layer status=ok backend={} cache={} ttl_secs={}",
            backend.kind().as_str(),
            cache.name(),
            config.cache.ttl.as_secs()
        );
        Ok(Self::from_parts(backend, cache, config.cache.ttl))
    }

    /// Wires an already built backend and cache store.
    pub fn from_parts(
        backend: Arc<dyn Backend>,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            store: Arc::new(CachedStore::new(backend, cache, ttl)),
        }
    }

    /// Wires `backend` without any cache.
    pub fn uncached(backend: Arc<dyn Backend>) -> Self {
        Self {
            store: Arc::new(CachedStore::uncached(backend)),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.store.kind()
    }

    pub fn milestones(&self) -> MilestoneRepository {
        MilestoneRepository::new(self.store.clone())
    }

    pub fn projects(&self) -> Repository<Project> {
        Repository::new(self.store.clone())
    }

    pub fn cost_headers(&self) -> Repository<CostHeader> {
        Repository::new(self.store.clone())
    }

    pub fn cost_lines(&self) -> Repository<CostLine> {
        Repository::new(self.store.clone())
    }

    pub fn log_entries(&self) -> Repository<LogEntry> {
        Repository::new(self.store.clone())
    }

    pub fn cash_movements(&self) -> Repository<CashMovement> {
        Repository::new(self.store.clone())
    }

    pub fn issues(&self) -> Repository<Issue> {
        Repository::new(self.store.clone())
    }

    pub fn status_history(&self) -> StatusHistoryRecorder {
        StatusHistoryRecorder::new(self.store.clone())
    }

    pub fn client_profiles(&self) -> Repository<ClientProfile> {
        Repository::new(self.store.clone())
    }
}
