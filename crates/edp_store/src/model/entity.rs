//! Entity kinds, field schemas and the shared `Entity` contract.
//!
//! # Responsibility
//! - Name every persisted entity type and its physical table.
//! - Describe each table's columns so adapters can bind and decode values.
//! - Define identifier parsing and model-level validation errors.
//!
//! # Invariants
//! - Every entity is identified by a non-nil UUID that never changes.
//! - The schema lists are the only fields adapters accept in records and
//!   filters.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier shared by every entity.
pub type EntityId = Uuid;

/// Storage type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    /// JSON document stored as text by the embedded store.
    Json,
}

/// One column of an entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec { name, ty }
}

const EDP_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("project_id", FieldType::Text),
    field("amount", FieldType::Integer),
    field("currency", FieldType::Text),
    field("status", FieldType::Text),
    field("created_at", FieldType::Integer),
    field("updated_at", FieldType::Integer),
    field("metadata", FieldType::Json),
];

const PROJECT_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("name", FieldType::Text),
    field("client_id", FieldType::Text),
    field("created_at", FieldType::Integer),
    field("updated_at", FieldType::Integer),
];

const COST_HEADER_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("project_id", FieldType::Text),
    field("description", FieldType::Text),
    field("created_at", FieldType::Integer),
];

const COST_LINE_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("header_id", FieldType::Text),
    field("position", FieldType::Integer),
    field("description", FieldType::Text),
    field("amount", FieldType::Integer),
];

const LOG_ENTRY_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("timestamp", FieldType::Integer),
    field("actor", FieldType::Text),
    field("payload", FieldType::Json),
];

const CASH_MOVEMENT_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("amount", FieldType::Integer),
    field("direction", FieldType::Text),
    field("timestamp", FieldType::Integer),
    field("edp_id", FieldType::Text),
];

const ISSUE_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("edp_id", FieldType::Text),
    field("description", FieldType::Text),
    field("resolution", FieldType::Text),
    field("created_at", FieldType::Integer),
    field("updated_at", FieldType::Integer),
];

const STATUS_HISTORY_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("edp_id", FieldType::Text),
    field("previous_status", FieldType::Text),
    field("new_status", FieldType::Text),
    field("timestamp", FieldType::Integer),
    field("actor", FieldType::Text),
];

const CLIENT_PROFILE_FIELDS: &[FieldSpec] = &[
    field("id", FieldType::Text),
    field("name", FieldType::Text),
    field("contact_name", FieldType::Text),
    field("contact_email", FieldType::Text),
    field("contact_phone", FieldType::Text),
    field("created_at", FieldType::Integer),
    field("updated_at", FieldType::Integer),
];

/// Every entity type persisted by this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    PaymentMilestone,
    Project,
    CostHeader,
    CostLine,
    LogEntry,
    CashMovement,
    Issue,
    StatusHistory,
    ClientProfile,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::PaymentMilestone,
        EntityKind::Project,
        EntityKind::CostHeader,
        EntityKind::CostLine,
        EntityKind::LogEntry,
        EntityKind::CashMovement,
        EntityKind::Issue,
        EntityKind::StatusHistory,
        EntityKind::ClientProfile,
    ];

    /// Short name used in cache keys and log events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaymentMilestone => "edp",
            Self::Project => "project",
            Self::CostHeader => "cost_header",
            Self::CostLine => "cost_line",
            Self::LogEntry => "log_entry",
            Self::CashMovement => "cash_movement",
            Self::Issue => "issue",
            Self::StatusHistory => "status_history",
            Self::ClientProfile => "client_profile",
        }
    }

    /// Physical table (embedded) or resource path (remote).
    pub fn table(self) -> &'static str {
        match self {
            Self::PaymentMilestone => "edps",
            Self::Project => "projects",
            Self::CostHeader => "cost_headers",
            Self::CostLine => "cost_lines",
            Self::LogEntry => "log_entries",
            Self::CashMovement => "cash_movements",
            Self::Issue => "issues",
            Self::StatusHistory => "status_history",
            Self::ClientProfile => "client_profiles",
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::PaymentMilestone => EDP_FIELDS,
            Self::Project => PROJECT_FIELDS,
            Self::CostHeader => COST_HEADER_FIELDS,
            Self::CostLine => COST_LINE_FIELDS,
            Self::LogEntry => LOG_ENTRY_FIELDS,
            Self::CashMovement => CASH_MOVEMENT_FIELDS,
            Self::Issue => ISSUE_FIELDS,
            Self::StatusHistory => STATUS_HISTORY_FIELDS,
            Self::ClientProfile => CLIENT_PROFILE_FIELDS,
        }
    }

    pub fn field(self, name: &str) -> Option<FieldSpec> {
        self.fields().iter().copied().find(|spec| spec.name == name)
    }

    /// Entity kinds whose rows are removed together with this kind's rows.
    ///
    /// Cost lines are owned by their header and go away with it.
    pub fn dependents(self) -> &'static [EntityKind] {
        match self {
            Self::CostHeader => &[EntityKind::CostLine],
            _ => &[],
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model-level invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid `{}`: {}", self.field, self.message)
    }
}

impl Error for ValidationError {}

/// Contract shared by every persisted domain type.
///
/// Implementors serialize to the flat record shape described by
/// `Self::KIND.fields()`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Rows are only ever inserted; update and delete are refused.
    const APPEND_ONLY: bool = false;

    /// Fields that generic updates may not touch.
    const GUARDED_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> EntityId;

    /// Checks field-level invariants before persistence.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Moves the update timestamp forward to at least `now_ms`.
    fn touch(&mut self, _now_ms: i64) {}
}

/// Values that can name an entity.
///
/// Text identifiers are parsed and must be non-nil UUIDs.
pub trait IntoEntityId {
    fn into_entity_id(self) -> Result<EntityId, ValidationError>;
}

impl IntoEntityId for EntityId {
    fn into_entity_id(self) -> Result<EntityId, ValidationError> {
        check_not_nil("id", self)
    }
}

impl IntoEntityId for &EntityId {
    fn into_entity_id(self) -> Result<EntityId, ValidationError> {
        check_not_nil("id", *self)
    }
}

impl IntoEntityId for &str {
    fn into_entity_id(self) -> Result<EntityId, ValidationError> {
        let parsed = Uuid::parse_str(self.trim())
            .map_err(|_| ValidationError::new("id", format!("`{self}` is not a UUID")))?;
        check_not_nil("id", parsed)
    }
}

impl IntoEntityId for &String {
    fn into_entity_id(self) -> Result<EntityId, ValidationError> {
        self.as_str().into_entity_id()
    }
}

impl IntoEntityId for String {
    fn into_entity_id(self) -> Result<EntityId, ValidationError> {
        self.as_str().into_entity_id()
    }
}

pub(crate) fn check_not_nil(field: &'static str, id: EntityId) -> Result<EntityId, ValidationError> {
    if id.is_nil() {
        return Err(ValidationError::new(field, "nil UUID is not a valid identifier"));
    }
    Ok(id)
}

pub(crate) fn check_not_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be blank"));
    }
    Ok(())
}

pub(crate) fn check_non_negative(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::new(field, format!("must be >= 0, got {value}")));
    }
    Ok(())
}

pub(crate) fn check_timestamps(created_at: i64, updated_at: i64) -> Result<(), ValidationError> {
    if updated_at < created_at {
        return Err(ValidationError::new(
            "updated_at",
            format!("{updated_at} is earlier than created_at {created_at}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{EntityKind, IntoEntityId};
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn every_kind_has_an_id_column_and_unique_table() {
        let mut tables = HashSet::new();
        for kind in EntityKind::ALL {
            assert_eq!(kind.fields()[0].name, "id", "{kind} must start with id");
            assert!(tables.insert(kind.table()));
        }
    }

    #[test]
    fn text_ids_must_be_non_nil_uuids() {
        assert!("not-a-uuid".into_entity_id().is_err());
        assert!(Uuid::nil().into_entity_id().is_err());

        let id = Uuid::new_v4();
        let text = id.to_string();
        assert_eq!(text.as_str().into_entity_id().unwrap(), id);
    }
}
