//! Data access and caching layer for payment milestones (EDPs) and their
//! surrounding project records.
//!
//! Service code talks to repositories handed out by [`DataLayer`]; the
//! backend (embedded SQLite or a remote REST store) and the cache are chosen
//! once at startup from [`StoreConfig`].

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod layer;
pub mod logging;
pub mod model;
pub mod repo;
pub mod store;

pub use cache::{CacheStore, CachedStore, MemoryCacheStore, NoopCacheStore, RedisCacheStore};
pub use config::{BackendKind, CacheConfig, CacheTarget, ConfigError, StoreConfig};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use layer::{DataLayer, OpenError};
pub use logging::{default_log_level, init_from_env, init_logging, logging_status, LoggingError};
pub use model::cost::{CostHeader, CostLine};
pub use model::edp::{EdpStatus, PaymentMilestone, StatusHistory, StatusTransition};
pub use model::entity::{Entity, EntityId, EntityKind, IntoEntityId, ValidationError};
pub use model::ledger::{CashDirection, CashMovement, Issue, IssueResolution, LogEntry};
pub use model::project::{ClientProfile, Project};
pub use repo::{MilestoneRepository, Repository, StatusHistoryRecorder};
pub use store::{
    Backend, OrderBy, Predicate, Query, Record, Records, RestBackend, RestConfig, SortDirection,
    SqliteBackend,
};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
