//! Cash movements, issues and the activity log.

use crate::clock::now_ms;
use crate::model::entity::{
    check_non_negative, check_not_blank, check_not_nil, check_timestamps, Entity, EntityId,
    EntityKind, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashDirection {
    Inflow,
    Outflow,
}

/// Cash box ("caja") entry, optionally tied to a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMovement {
    pub id: EntityId,
    /// Minor currency units; the sign lives in `direction`.
    pub amount: i64,
    pub direction: CashDirection,
    pub timestamp: i64,
    pub edp_id: Option<EntityId>,
}

impl CashMovement {
    pub fn new(amount: i64, direction: CashDirection, edp_id: Option<EntityId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            direction,
            timestamp: now_ms(),
            edp_id,
        }
    }
}

impl Entity for CashMovement {
    const KIND: EntityKind = EntityKind::CashMovement;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_non_negative("amount", self.amount)?;
        if let Some(edp_id) = self.edp_id {
            check_not_nil("edp_id", edp_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueResolution {
    Open,
    Resolved,
    Dismissed,
}

impl IssueResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }
}

/// Problem raised against a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: EntityId,
    pub edp_id: EntityId,
    pub description: String,
    pub resolution: IssueResolution,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Issue {
    pub fn open(edp_id: EntityId, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4(),
            edp_id,
            description: description.into(),
            resolution: IssueResolution::Open,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Issue {
    const KIND: EntityKind = EntityKind::Issue;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_nil("edp_id", self.edp_id)?;
        check_not_blank("description", &self.description)?;
        check_timestamps(self.created_at, self.updated_at)
    }

    fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
    }
}

/// Activity log line. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntityId,
    pub timestamp: i64,
    pub actor: String,
    pub payload: Value,
}

impl LogEntry {
    pub fn new(actor: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now_ms(),
            actor: actor.into(),
            payload,
        }
    }
}

impl Entity for LogEntry {
    const KIND: EntityKind = EntityKind::LogEntry;
    const APPEND_ONLY: bool = true;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_blank("actor", &self.actor)
    }
}
