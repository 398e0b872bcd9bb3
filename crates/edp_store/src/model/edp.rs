//! Payment milestone (EDP) model and its status audit trail.
//!
//! # Responsibility
//! - Define the milestone record and the enumerated status lifecycle.
//! - Define the append-only status history row.
//!
//! # Invariants
//! - `status` is always one of `EdpStatus`; unknown values fail to decode.
//! - `amount` is in minor currency units and never negative.
//! - `currency` is a three-letter upper-case code.
//! - A history row never records a transition to the same status.

use crate::clock::now_ms;
use crate::model::entity::{
    check_non_negative, check_not_blank, check_not_nil, check_timestamps, Entity, EntityId,
    EntityKind, ValidationError,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static CURRENCY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("valid regex"));

/// Lifecycle state of a payment milestone.
///
/// Which moves between states are allowed is decided by the caller's
/// business policy, not by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdpStatus {
    Pending,
    Submitted,
    InClientReview,
    Approved,
    Rejected,
    Rework,
    Paid,
}

impl EdpStatus {
    pub const ALL: [EdpStatus; 7] = [
        EdpStatus::Pending,
        EdpStatus::Submitted,
        EdpStatus::InClientReview,
        EdpStatus::Approved,
        EdpStatus::Rejected,
        EdpStatus::Rework,
        EdpStatus::Paid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::InClientReview => "in_client_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Rework => "rework",
            Self::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
    }
}

impl Display for EdpStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billable unit of work tracked until paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMilestone {
    pub id: EntityId,
    pub project_id: EntityId,
    pub amount: i64,
    pub currency: String,
    pub status: EdpStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// Free-form JSON object.
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

impl PaymentMilestone {
    /// Creates a `pending` milestone with a fresh id.
    pub fn new(project_id: EntityId, amount: i64, currency: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4(),
            project_id,
            amount,
            currency: currency.into(),
            status: EdpStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata: empty_object(),
        }
    }
}

impl Entity for PaymentMilestone {
    const KIND: EntityKind = EntityKind::PaymentMilestone;
    const GUARDED_FIELDS: &'static [&'static str] = &["status"];

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_nil("project_id", self.project_id)?;
        check_non_negative("amount", self.amount)?;
        if !CURRENCY_CODE.is_match(&self.currency) {
            return Err(ValidationError::new(
                "currency",
                format!("`{}` is not a three-letter upper-case code", self.currency),
            ));
        }
        if !self.metadata.is_object() {
            return Err(ValidationError::new("metadata", "must be a JSON object"));
        }
        check_timestamps(self.created_at, self.updated_at)
    }

    fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
    }
}

/// Requested status move, carrying the value the caller believes is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub previous: EdpStatus,
    pub new: EdpStatus,
    pub actor: String,
}

impl StatusTransition {
    pub fn new(previous: EdpStatus, new: EdpStatus, actor: impl Into<String>) -> Self {
        Self {
            previous,
            new,
            actor: actor.into(),
        }
    }
}

/// One observed status transition. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: EntityId,
    pub edp_id: EntityId,
    pub previous_status: EdpStatus,
    pub new_status: EdpStatus,
    pub timestamp: i64,
    pub actor: String,
}

impl StatusHistory {
    pub fn from_transition(edp_id: EntityId, transition: &StatusTransition) -> Self {
        Self {
            id: Uuid::new_v4(),
            edp_id,
            previous_status: transition.previous,
            new_status: transition.new,
            timestamp: now_ms(),
            actor: transition.actor.clone(),
        }
    }

    pub fn matches(&self, transition: &StatusTransition) -> bool {
        self.previous_status == transition.previous && self.new_status == transition.new
    }
}

impl Entity for StatusHistory {
    const KIND: EntityKind = EntityKind::StatusHistory;
    const APPEND_ONLY: bool = true;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_nil("edp_id", self.edp_id)?;
        check_not_blank("actor", &self.actor)?;
        if self.previous_status == self.new_status {
            return Err(ValidationError::new(
                "new_status",
                format!("transition must change status, got {}", self.new_status),
            ));
        }
        Ok(())
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::{EdpStatus, PaymentMilestone};
    use crate::model::entity::Entity;
    use uuid::Uuid;

    #[test]
    fn status_wire_names_round_trip() {
        for status in EdpStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(EdpStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EdpStatus::parse("archived"), None);
    }

    #[test]
    fn validate_rejects_negative_amount_and_bad_currency() {
        let mut edp = PaymentMilestone::new(Uuid::new_v4(), 1_000, "CLP");
        edp.validate().unwrap();

        edp.amount = -1;
        assert_eq!(edp.validate().unwrap_err().field, "amount");

        edp.amount = 1;
        edp.currency = "clp".to_string();
        assert_eq!(edp.validate().unwrap_err().field, "currency");
    }

    #[test]
    fn unknown_status_fails_to_decode() {
        let mut json = serde_json::to_value(PaymentMilestone::new(Uuid::new_v4(), 5, "USD")).unwrap();
        json["status"] = "archived".into();
        assert!(serde_json::from_value::<PaymentMilestone>(json).is_err());
    }
}
