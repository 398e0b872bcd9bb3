//! Payment milestone repository.
//!
//! # Responsibility
//! - Expose the generic CRUD facade for milestones plus project and status
//!   lookups.
//! - Drive status transitions and their audit rows.
//!
//! # Invariants
//! - `status` only changes through `transition_status`.
//! - The status write is conditional on the stored status still being
//!   `transition.previous`; a lost race writes nothing and appends nothing.
//! - A committed status write is followed by exactly one history append.

use super::{check_patch, parse_id, Repository, StatusHistoryRecorder};
use crate::cache::CachedStore;
use crate::error::{StoreError, StoreResult};
use crate::model::edp::{EdpStatus, PaymentMilestone, StatusHistory, StatusTransition};
use crate::model::entity::{check_not_blank, Entity, EntityId, IntoEntityId, ValidationError};
use crate::model::project::Project;
use crate::store::{Query, Record};
use log::{error, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Payment milestone facade; status changes go through `transition_status`
/// so every change leaves exactly one history row.
#[derive(Clone)]
pub struct MilestoneRepository {
    inner: Repository<PaymentMilestone>,
    recorder: StatusHistoryRecorder,
}

impl MilestoneRepository {
    pub(crate) fn new(store: Arc<CachedStore>) -> Self {
        Self {
            inner: Repository::new(store.clone()),
            recorder: StatusHistoryRecorder::new(store),
        }
    }

    pub fn get(&self, id: impl IntoEntityId) -> StoreResult<Option<PaymentMilestone>> {
        self.inner.get(id)
    }

    pub fn require(&self, id: impl IntoEntityId) -> StoreResult<PaymentMilestone> {
        self.inner.require(id)
    }

    pub fn list(&self, query: &Query) -> StoreResult<Vec<PaymentMilestone>> {
        self.inner.list(query)
    }

    pub fn insert(&self, milestone: &PaymentMilestone) -> StoreResult<EntityId> {
        self.inner.insert(milestone)
    }

    /// Updates non-status fields; `status` in the patch is rejected.
    pub fn update(&self, id: impl IntoEntityId, patch: &Record) -> StoreResult<PaymentMilestone> {
        self.inner.update(id, patch)
    }

    pub fn delete(&self, id: impl IntoEntityId) -> StoreResult<()> {
        self.inner.delete(id)
    }

    pub fn for_project(&self, project_id: impl IntoEntityId) -> StoreResult<Vec<PaymentMilestone>> {
        let project_id = parse_id::<Project>(project_id)?;
        self.inner.list(
            &Query::new()
                .eq("project_id", project_id.to_string())
                .order_asc("created_at"),
        )
    }

    pub fn with_status(&self, status: EdpStatus) -> StoreResult<Vec<PaymentMilestone>> {
        self.inner.list(
            &Query::new()
                .eq("status", status.as_str())
                .order_asc("created_at"),
        )
    }

    /// Moves a milestone from `transition.previous` to `transition.new`,
    /// applying `extra` non-status fields in the same write.
    ///
    /// Order: compare the stored status, write the milestone, append the
    /// history row.
    ///
    /// # Errors
    /// - `Validation` when `previous == new`, the actor is blank, or `extra`
    ///   names `id`, `status` or unknown fields.
    /// - `InvalidTransitionRecord` when the stored status is not
    ///   `transition.previous`, either before the write or at the moment it
    ///   lands; nothing is written.
    /// - `AuditFailure` when the milestone was written but its history row
    ///   was not; recover with `StatusHistoryRecorder::reconcile`.
    pub fn transition_status(
        &self,
        id: impl IntoEntityId,
        transition: &StatusTransition,
        extra: &Record,
    ) -> StoreResult<PaymentMilestone> {
        let id = parse_id::<PaymentMilestone>(id)?;
        let reject = |err: ValidationError| {
            StoreError::validation(PaymentMilestone::KIND, Some(id.to_string()), err)
        };
        if transition.previous == transition.new {
            return Err(reject(ValidationError::new(
                "status",
                format!("transition must change status, got {}", transition.new),
            )));
        }
        check_not_blank("actor", &transition.actor).map_err(reject)?;
        check_patch::<PaymentMilestone>(id, extra, PaymentMilestone::GUARDED_FIELDS)?;

        let current = self.inner.require_fresh(id)?;
        self.recorder.check(&current, transition)?;

        let mut patch = extra.clone();
        patch.insert(
            "status".to_string(),
            Value::String(transition.new.as_str().to_string()),
        );
        let mut expected = Record::new();
        expected.insert(
            "status".to_string(),
            Value::String(transition.previous.as_str().to_string()),
        );
        let Some(updated) = self.inner.apply_patch_if(id, current, &expected, &patch)? else {
            let actual = self.inner.require_fresh(id)?.status;
            warn!(
                "event=status_transition module=repo edp_id={id} previous={} new={} status=lost_race actual={actual}",
                transition.previous, transition.new
            );
            return Err(StoreError::InvalidTransitionRecord {
                edp_id: id,
                expected: transition.previous,
                actual,
            });
        };

        if let Err(err) = self.recorder.append(id, transition) {
            error!(
                "event=status_transition module=repo edp_id={id} previous={} new={} status=audit_failed error_kind={} error={err}",
                transition.previous,
                transition.new,
                err.kind().as_str()
            );
            return Err(StoreError::AuditFailure {
                edp_id: id,
                source: Box::new(err),
            });
        }
        info!(
            "event=status_transition module=repo edp_id={id} previous={} new={} status=ok",
            transition.previous, transition.new
        );
        Ok(updated)
    }

    /// The milestone's recorded transitions, oldest first.
    pub fn history(&self, id: impl IntoEntityId) -> StoreResult<Vec<StatusHistory>> {
        self.recorder.for_milestone(id)
    }

    pub fn recorder(&self) -> &StatusHistoryRecorder {
        &self.recorder
    }
}
