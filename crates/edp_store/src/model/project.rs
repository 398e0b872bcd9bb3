//! Project and client profile models.

use crate::clock::now_ms;
use crate::model::entity::{
    check_not_blank, check_not_nil, check_timestamps, Entity, EntityId, EntityKind,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit of work that groups payment milestones.
///
/// Totals over milestones are derived by callers and never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    pub client_id: Option<EntityId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    pub fn new(name: impl Into<String>, client_id: Option<EntityId>) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            client_id,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_blank("name", &self.name)?;
        if let Some(client_id) = self.client_id {
            check_not_nil("client_id", client_id)?;
        }
        check_timestamps(self.created_at, self.updated_at)
    }

    fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
    }
}

/// Customer that owns zero or more projects (linked from `Project::client_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub id: EntityId,
    pub name: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClientProfile {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for ClientProfile {
    const KIND: EntityKind = EntityKind::ClientProfile;

    fn id(&self) -> EntityId {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_not_nil("id", self.id)?;
        check_not_blank("name", &self.name)?;
        if let Some(email) = self.contact_email.as_deref() {
            if !email.contains('@') {
                return Err(ValidationError::new(
                    "contact_email",
                    format!("`{email}` is not an email address"),
                ));
            }
        }
        check_timestamps(self.created_at, self.updated_at)
    }

    fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
    }
}
