//! Error taxonomy shared by adapters, cache layer and repositories.
//!
//! # Invariants
//! - Every variant names the entity kind it concerns; identifiers are
//!   attached whenever the failing call had one.
//! - Cache failures never appear here; they stay inside the cache layer.
//! - Only `Transient` is safe to retry.

use crate::model::edp::EdpStatus;
use crate::model::entity::{EntityId, EntityKind, ValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Flat classification of a `StoreError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    UnsupportedQuery,
    SchemaMissing,
    AuthFailure,
    Transient,
    InvalidTransitionRecord,
    AuditFailure,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::UnsupportedQuery => "unsupported_query",
            Self::SchemaMissing => "schema_missing",
            Self::AuthFailure => "auth_failure",
            Self::Transient => "transient",
            Self::InvalidTransitionRecord => "invalid_transition_record",
            Self::AuditFailure => "audit_failure",
            Self::Storage => "storage",
        }
    }
}

/// Failure of a data layer operation.
#[derive(Debug)]
pub enum StoreError {
    /// No row with this identifier.
    NotFound { entity: EntityKind, id: String },
    /// Input rejected before reaching storage.
    Validation {
        entity: EntityKind,
        id: Option<String>,
        source: ValidationError,
    },
    /// Filter or order shape the active backend cannot express.
    UnsupportedQuery {
        entity: EntityKind,
        id: Option<String>,
        message: String,
    },
    /// Embedded store has no table for this entity.
    SchemaMissing {
        entity: EntityKind,
        id: Option<String>,
        table: &'static str,
    },
    /// Remote store refused the credential (HTTP 401/403). Never retried.
    AuthFailure {
        entity: EntityKind,
        id: Option<String>,
        status: u16,
    },
    /// Remote store failed in a way that may succeed on retry.
    Transient {
        entity: EntityKind,
        id: Option<String>,
        message: String,
    },
    /// Stored status differs from the transition's expected previous value.
    InvalidTransitionRecord {
        edp_id: EntityId,
        expected: EdpStatus,
        actual: EdpStatus,
    },
    /// Milestone write committed but its history row could not be written.
    AuditFailure {
        edp_id: EntityId,
        source: Box<StoreError>,
    },
    /// Unclassified backend failure.
    Storage {
        entity: EntityKind,
        id: Option<String>,
        message: String,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::UnsupportedQuery { .. } => ErrorKind::UnsupportedQuery,
            Self::SchemaMissing { .. } => ErrorKind::SchemaMissing,
            Self::AuthFailure { .. } => ErrorKind::AuthFailure,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::InvalidTransitionRecord { .. } => ErrorKind::InvalidTransitionRecord,
            Self::AuditFailure { .. } => ErrorKind::AuditFailure,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            Self::NotFound { entity, .. }
            | Self::Validation { entity, .. }
            | Self::UnsupportedQuery { entity, .. }
            | Self::SchemaMissing { entity, .. }
            | Self::AuthFailure { entity, .. }
            | Self::Transient { entity, .. }
            | Self::Storage { entity, .. } => *entity,
            Self::InvalidTransitionRecord { .. } | Self::AuditFailure { .. } => {
                EntityKind::PaymentMilestone
            }
        }
    }

    /// Identifier of the row the failing call addressed, when it had one.
    pub fn id(&self) -> Option<String> {
        match self {
            Self::NotFound { id, .. } => Some(id.clone()),
            Self::Validation { id, .. }
            | Self::UnsupportedQuery { id, .. }
            | Self::SchemaMissing { id, .. }
            | Self::AuthFailure { id, .. }
            | Self::Transient { id, .. }
            | Self::Storage { id, .. } => id.clone(),
            Self::InvalidTransitionRecord { edp_id, .. } | Self::AuditFailure { edp_id, .. } => {
                Some(edp_id.to_string())
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn validation(entity: EntityKind, id: Option<String>, source: ValidationError) -> Self {
        Self::Validation { entity, id, source }
    }

    pub(crate) fn unsupported(entity: EntityKind, message: impl Into<String>) -> Self {
        Self::UnsupportedQuery {
            entity,
            id: None,
            message: message.into(),
        }
    }

    pub(crate) fn schema_missing(entity: EntityKind, id: Option<&str>) -> Self {
        Self::SchemaMissing {
            entity,
            id: id.map(str::to_string),
            table: entity.table(),
        }
    }

    pub(crate) fn auth_failure(entity: EntityKind, id: Option<&str>, status: u16) -> Self {
        Self::AuthFailure {
            entity,
            id: id.map(str::to_string),
            status,
        }
    }

    pub(crate) fn storage(entity: EntityKind, id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Storage {
            entity,
            id: id.map(str::to_string),
            message: message.into(),
        }
    }

    pub(crate) fn transient(
        entity: EntityKind,
        id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transient {
            entity,
            id: id.map(str::to_string),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Validation { entity, id, source } => match id {
                Some(id) => write!(f, "{entity} {id} rejected: {source}"),
                None => write!(f, "{entity} rejected: {source}"),
            },
            Self::UnsupportedQuery { entity, message, .. } => {
                write!(f, "unsupported {entity} query: {message}")
            }
            Self::SchemaMissing { entity, id, table } => match id {
                Some(id) => write!(f, "{entity} {id}: storage requires table `{table}`"),
                None => write!(f, "{entity} storage requires table `{table}`"),
            },
            Self::AuthFailure { entity, id, status } => match id {
                Some(id) => write!(
                    f,
                    "remote store rejected credentials for {entity} {id} (HTTP {status})"
                ),
                None => write!(f, "remote store rejected credentials for {entity} (HTTP {status})"),
            },
            Self::Transient {
                entity,
                id,
                message,
            } => match id {
                Some(id) => write!(f, "transient failure on {entity} {id}: {message}"),
                None => write!(f, "transient failure on {entity}: {message}"),
            },
            Self::InvalidTransitionRecord {
                edp_id,
                expected,
                actual,
            } => write!(
                f,
                "edp {edp_id} status is `{actual}`, transition expected `{expected}`"
            ),
            Self::AuditFailure { edp_id, source } => write!(
                f,
                "edp {edp_id} was written but its status history was not: {source}"
            ),
            Self::Storage {
                entity,
                id,
                message,
            } => match id {
                Some(id) => write!(f, "{entity} {id} storage failure: {message}"),
                None => write!(f, "{entity} storage failure: {message}"),
            },
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation { source, .. } => Some(source),
            Self::AuditFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
