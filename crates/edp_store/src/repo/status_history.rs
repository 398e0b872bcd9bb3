//! Append-only audit trail of milestone status transitions.
//!
//! # Invariants
//! - A row is only appended after the stored status was compared against
//!   the transition's expected value.
//! - Rows are never updated or deleted.
//! - Which transitions are legal is the caller's business rule, never
//!   decided here.

use super::{parse_id, Repository};
use crate::cache::CachedStore;
use crate::error::{StoreError, StoreResult};
use crate::model::edp::{EdpStatus, PaymentMilestone, StatusHistory, StatusTransition};
use crate::model::entity::{Entity, EntityId, IntoEntityId};
use crate::store::Query;
use log::{info, warn};
use std::sync::Arc;

/// Writer and reader of `StatusHistory` rows.
#[derive(Clone)]
pub struct StatusHistoryRecorder {
    history: Repository<StatusHistory>,
    milestones: Repository<PaymentMilestone>,
}

impl StatusHistoryRecorder {
    pub(crate) fn new(store: Arc<CachedStore>) -> Self {
        Self {
            history: Repository::new(store.clone()),
            milestones: Repository::new(store),
        }
    }

    /// Fails with `InvalidTransitionRecord` unless `current` is stored at
    /// the transition's expected previous status.
    pub fn check(&self, current: &PaymentMilestone, transition: &StatusTransition) -> StoreResult<()> {
        expect_status(current.id, transition.previous, current.status)
    }

    /// Inserts the history row for an already verified transition.
    pub fn append(
        &self,
        edp_id: impl IntoEntityId,
        transition: &StatusTransition,
    ) -> StoreResult<StatusHistory> {
        let edp_id = parse_id::<PaymentMilestone>(edp_id)?;
        let row = StatusHistory::from_transition(edp_id, transition);
        self.history.insert(&row)?;
        info!(
            "event=status_history_append module=repo edp_id={edp_id} previous={} new={} status=ok",
            transition.previous, transition.new
        );
        Ok(row)
    }

    /// Compares the stored status against `transition.previous`, then appends.
    ///
    /// For callers that write the milestone through their own path and only
    /// need the audit step.
    pub fn record(
        &self,
        edp_id: impl IntoEntityId,
        transition: &StatusTransition,
    ) -> StoreResult<StatusHistory> {
        let edp_id = parse_id::<PaymentMilestone>(edp_id)?;
        let current = self.milestones.require_fresh(edp_id)?;
        self.check(&current, transition)?;
        self.append(edp_id, transition)
    }

    /// Repairs the trail after an `AuditFailure`.
    ///
    /// The milestone must already be at `transition.new`. When the newest
    /// history row already records this transition it is returned as is, so
    /// repeated calls append at most one row.
    pub fn reconcile(
        &self,
        edp_id: impl IntoEntityId,
        transition: &StatusTransition,
    ) -> StoreResult<StatusHistory> {
        let edp_id = parse_id::<PaymentMilestone>(edp_id)?;
        let current = self.milestones.require_fresh(edp_id)?;
        expect_status(edp_id, transition.new, current.status)?;

        if let Some(latest) = self.latest(edp_id)? {
            if latest.matches(transition) {
                info!(
                    "event=status_history_reconcile module=repo edp_id={edp_id} status=already_recorded"
                );
                return Ok(latest);
            }
        }
        let row = self.append(edp_id, transition)?;
        info!("event=status_history_reconcile module=repo edp_id={edp_id} status=appended");
        Ok(row)
    }

    /// Transitions of one milestone, oldest first.
    pub fn for_milestone(&self, edp_id: impl IntoEntityId) -> StoreResult<Vec<StatusHistory>> {
        let edp_id = parse_id::<PaymentMilestone>(edp_id)?;
        self.history.list(
            &Query::new()
                .eq("edp_id", edp_id.to_string())
                .order_asc("timestamp"),
        )
    }

    pub fn get(&self, id: impl IntoEntityId) -> StoreResult<Option<StatusHistory>> {
        self.history.get(id)
    }

    pub fn list(&self, query: &Query) -> StoreResult<Vec<StatusHistory>> {
        self.history.list(query)
    }

    fn latest(&self, edp_id: EntityId) -> StoreResult<Option<StatusHistory>> {
        let rows = self.history.list(
            &Query::new()
                .eq("edp_id", edp_id.to_string())
                .order_desc("timestamp")
                .limit(1),
        )?;
        Ok(rows.into_iter().next())
    }
}

fn expect_status(edp_id: EntityId, expected: EdpStatus, actual: EdpStatus) -> StoreResult<()> {
    if expected != actual {
        warn!(
            "event=status_transition_rejected module=repo entity={} edp_id={edp_id} expected={expected} actual={actual}",
            PaymentMilestone::KIND
        );
        return Err(StoreError::InvalidTransitionRecord {
            edp_id,
            expected,
            actual,
        });
    }
    Ok(())
}
