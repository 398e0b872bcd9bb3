//! Entity-scoped repositories over the cached store.
//!
//! # Responsibility
//! - Convert between typed entities and backend records.
//! - Validate identifiers, entities and patches before any write.
//! - Shape entity-specific lookups into generic queries.
//!
//! # Invariants
//! - Invalid input fails with `Validation` and never reaches the backend.
//! - Append-only entities are never updated or deleted through this layer.
//! - `updated_at` never moves backwards for a given identifier.

mod milestone;
mod status_history;

pub use milestone::MilestoneRepository;
pub use status_history::StatusHistoryRecorder;

use crate::cache::CachedStore;
use crate::clock::now_ms;
use crate::error::{StoreError, StoreResult};
use crate::model::cost::{CostHeader, CostLine};
use crate::model::edp::PaymentMilestone;
use crate::model::entity::{Entity, EntityId, IntoEntityId, ValidationError};
use crate::model::ledger::{CashMovement, Issue, IssueResolution, LogEntry};
use crate::model::project::{ClientProfile, Project};
use crate::store::{Backend, Predicate, Query, Record};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed CRUD facade for one entity kind.
pub struct Repository<E: Entity> {
    store: Arc<CachedStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<E: Entity> Repository<E> {
    pub(crate) fn new(store: Arc<CachedStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// Cached point read.
    pub fn get(&self, id: impl IntoEntityId) -> StoreResult<Option<E>> {
        let id = parse_id::<E>(id)?;
        self.store
            .get(E::KIND, &id.to_string())?
            .map(decode::<E>)
            .transpose()
    }

    /// Like `get`, but a missing row is `NotFound`.
    pub fn require(&self, id: impl IntoEntityId) -> StoreResult<E> {
        let id = parse_id::<E>(id)?;
        self.get(id)?
            .ok_or_else(|| StoreError::not_found(E::KIND, id.to_string()))
    }

    pub fn list(&self, query: &Query) -> StoreResult<Vec<E>> {
        self.store
            .list(E::KIND, query)?
            .map(decode::<E>)
            .collect()
    }

    /// Validates and stores a new entity, returning its identifier.
    pub fn insert(&self, entity: &E) -> StoreResult<EntityId> {
        let id = entity.id();
        entity
            .validate()
            .map_err(|err| StoreError::validation(E::KIND, Some(id.to_string()), err))?;
        let stored = self.store.insert(E::KIND, &encode(entity)?)?;
        stored.as_str().into_entity_id().map_err(|_| {
            StoreError::storage(
                E::KIND,
                Some(&stored),
                "backend returned a malformed identifier",
            )
        })
    }

    /// Applies `patch` to the stored entity and returns the result.
    ///
    /// The patch may not name `id`, unknown fields, or guarded fields.
    pub fn update(&self, id: impl IntoEntityId, patch: &Record) -> StoreResult<E> {
        let id = parse_id::<E>(id)?;
        reject_append_only::<E>(id, "updated")?;
        check_patch::<E>(id, patch, E::GUARDED_FIELDS)?;
        let current = self.require_fresh(id)?;
        self.apply_patch(id, current, patch)
    }

    pub fn delete(&self, id: impl IntoEntityId) -> StoreResult<()> {
        let id = parse_id::<E>(id)?;
        reject_append_only::<E>(id, "deleted")?;
        self.store.delete(E::KIND, &id.to_string())
    }

    /// Uncached read used before read-modify-write sequences.
    pub(crate) fn get_fresh(&self, id: EntityId) -> StoreResult<Option<E>> {
        self.store
            .get_fresh(E::KIND, &id.to_string())?
            .map(decode::<E>)
            .transpose()
    }

    pub(crate) fn require_fresh(&self, id: EntityId) -> StoreResult<E> {
        self.get_fresh(id)?
            .ok_or_else(|| StoreError::not_found(E::KIND, id.to_string()))
    }

    /// Merges an already checked patch into `current`, validates the result
    /// and writes the patched fields plus `updated_at`.
    fn apply_patch(&self, id: EntityId, current: E, patch: &Record) -> StoreResult<E> {
        let write = patched_fields(id, current, patch)?;
        let stored = self.store.update(E::KIND, &id.to_string(), &write)?;
        decode(stored)
    }

    /// Like `apply_patch`, but the write only lands while the stored row
    /// still holds every `expected` value; `Ok(None)` otherwise.
    pub(crate) fn apply_patch_if(
        &self,
        id: EntityId,
        current: E,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<E>> {
        let write = patched_fields(id, current, patch)?;
        self.store
            .update_if(E::KIND, &id.to_string(), expected, &write)?
            .map(decode::<E>)
            .transpose()
    }
}

/// Validated patch fields plus a fresh `updated_at`, ready to write.
fn patched_fields<E: Entity>(id: EntityId, current: E, patch: &Record) -> StoreResult<Record> {
    let mut merged = encode(&current)?;
    for (field, value) in patch {
        merged.insert(field.clone(), value.clone());
    }
    let mut next: E = serde_json::from_value(Value::Object(merged)).map_err(|err| {
        StoreError::validation(
            E::KIND,
            Some(id.to_string()),
            ValidationError::new("patch", err.to_string()),
        )
    })?;
    next.validate()
        .map_err(|err| StoreError::validation(E::KIND, Some(id.to_string()), err))?;
    next.touch(now_ms());

    let normalized = encode(&next)?;
    let mut write = Record::new();
    for field in patch.keys().map(String::as_str).chain(["updated_at"]) {
        if let Some(value) = normalized.get(field) {
            write.insert(field.to_string(), value.clone());
        }
    }
    Ok(write)
}

impl Repository<Project> {
    pub fn for_client(&self, client_id: impl IntoEntityId) -> StoreResult<Vec<Project>> {
        let client_id = parse_id::<ClientProfile>(client_id)?;
        self.list(
            &Query::new()
                .eq("client_id", client_id.to_string())
                .order_asc("name"),
        )
    }
}

impl Repository<ClientProfile> {
    /// Profiles whose name matches a `LIKE` pattern (`%` and `_` wildcards).
    pub fn name_like(&self, pattern: &str) -> StoreResult<Vec<ClientProfile>> {
        self.list(
            &Query::new()
                .filter("name", Predicate::Like(pattern.to_string()))
                .order_asc("name"),
        )
    }
}

impl Repository<CostHeader> {
    pub fn for_project(&self, project_id: impl IntoEntityId) -> StoreResult<Vec<CostHeader>> {
        let project_id = parse_id::<Project>(project_id)?;
        self.list(
            &Query::new()
                .eq("project_id", project_id.to_string())
                .order_asc("created_at"),
        )
    }
}

impl Repository<CostLine> {
    /// Lines of one header in `position` order.
    pub fn for_header(&self, header_id: impl IntoEntityId) -> StoreResult<Vec<CostLine>> {
        let header_id = parse_id::<CostHeader>(header_id)?;
        self.list(
            &Query::new()
                .eq("header_id", header_id.to_string())
                .order_asc("position"),
        )
    }
}

impl Repository<LogEntry> {
    pub fn by_actor(&self, actor: &str) -> StoreResult<Vec<LogEntry>> {
        self.list(&Query::new().eq("actor", actor).order_asc("timestamp"))
    }

    /// The `limit` newest entries, newest first.
    pub fn recent(&self, limit: u32) -> StoreResult<Vec<LogEntry>> {
        self.list(&Query::new().order_desc("timestamp").limit(limit))
    }
}

impl Repository<CashMovement> {
    pub fn for_milestone(&self, edp_id: impl IntoEntityId) -> StoreResult<Vec<CashMovement>> {
        let edp_id = parse_id::<PaymentMilestone>(edp_id)?;
        self.list(
            &Query::new()
                .eq("edp_id", edp_id.to_string())
                .order_asc("timestamp"),
        )
    }

    /// Movements with `from_ms <= timestamp < to_ms`, oldest first.
    pub fn between(&self, from_ms: i64, to_ms: i64) -> StoreResult<Vec<CashMovement>> {
        self.list(
            &Query::new()
                .between("timestamp", from_ms, to_ms)
                .order_asc("timestamp"),
        )
    }
}

impl Repository<Issue> {
    pub fn for_milestone(&self, edp_id: impl IntoEntityId) -> StoreResult<Vec<Issue>> {
        let edp_id = parse_id::<PaymentMilestone>(edp_id)?;
        self.list(
            &Query::new()
                .eq("edp_id", edp_id.to_string())
                .order_asc("created_at"),
        )
    }

    pub fn open_issues(&self) -> StoreResult<Vec<Issue>> {
        self.list(
            &Query::new()
                .eq("resolution", IssueResolution::Open.as_str())
                .order_asc("created_at"),
        )
    }
}

pub(crate) fn parse_id<E: Entity>(id: impl IntoEntityId) -> StoreResult<EntityId> {
    id.into_entity_id()
        .map_err(|err| StoreError::validation(E::KIND, None, err))
}

/// Rejects patches naming `id`, unknown fields, or any of `guarded`.
pub(crate) fn check_patch<E: Entity>(
    id: EntityId,
    patch: &Record,
    guarded: &[&'static str],
) -> StoreResult<()> {
    let reject = |err: ValidationError| StoreError::validation(E::KIND, Some(id.to_string()), err);
    for field in patch.keys() {
        if field == "id" {
            return Err(reject(ValidationError::new("id", "identifier cannot change")));
        }
        if E::KIND.field(field).is_none() {
            return Err(reject(ValidationError::new(
                "patch",
                format!("unknown field `{field}`"),
            )));
        }
        if let Some(guarded) = guarded.iter().copied().find(|guarded| *guarded == field.as_str()) {
            return Err(reject(ValidationError::new(
                guarded,
                "cannot be changed by a generic update",
            )));
        }
    }
    Ok(())
}

fn reject_append_only<E: Entity>(id: EntityId, verb: &str) -> StoreResult<()> {
    if E::APPEND_ONLY {
        return Err(StoreError::validation(
            E::KIND,
            Some(id.to_string()),
            ValidationError::new("id", format!("append-only {} cannot be {verb}", E::KIND)),
        ));
    }
    Ok(())
}

pub(crate) fn encode<E: Entity>(entity: &E) -> StoreResult<Record> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(StoreError::storage(
            E::KIND,
            Some(&entity.id().to_string()),
            "entity did not serialize to an object",
        )),
        Err(err) => Err(StoreError::storage(
            E::KIND,
            Some(&entity.id().to_string()),
            err.to_string(),
        )),
    }
}

pub(crate) fn decode<E: Entity>(record: Record) -> StoreResult<E> {
    let id = record
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);
    serde_json::from_value(Value::Object(record)).map_err(|err| {
        StoreError::storage(
            E::KIND,
            id.as_deref(),
            format!("stored record does not decode: {err}"),
        )
    })
}
