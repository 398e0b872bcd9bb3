//! Cost header and cost line models.
//!
//! # Invariants
//! - A cost line points at its header through `header_id`; headers never
//!   hold their lines.
//! - Lines of one header are ordered by `position`.

use crate::clock::now_ms;
use crate::model::entity::{
    check_non_negative, check_not_blank, check_not_nil, Entity, EntityId, EntityKind,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostHeader {
    pub id: EntityId,
    pub project_id: EntityId,
    pub description: String,
    pub created_at: i64,
}

impl CostHeader {
    pub fn new(project_id: EntityId, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            description: description.into(),
            created_at: now_ms(),
        }
    }
}

impl Entity for CostHeader {
    const KIND: EntityKind = EntityKind::CostHeader;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_nil("project_id", self.project_id)?;
        check_not_blank("description", &self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLine {
    pub id: EntityId,
    pub header_id: EntityId,
    pub position: i64,
    pub description: String,
    /// Minor currency units.
    pub amount: i64,
}

impl CostLine {
    pub fn new(
        header_id: EntityId,
        position: i64,
        description: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            header_id,
            position,
            description: description.into(),
            amount,
        }
    }
}

impl Entity for CostLine {
    const KIND: EntityKind = EntityKind::CostLine;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_nil("header_id", self.header_id)?;
        check_non_negative("position", self.position)?;
        check_non_negative("amount", self.amount)?;
        check_not_blank("description", &self.description)
    }
}
