//! Embedded SQLite adapter.
//!
//! # Responsibility
//! - Translate backend calls into single SQL statements against one file.
//! - Bind JSON record values to SQL and decode rows by the entity schema.
//!
//! # Invariants
//! - Each call is atomic at statement level only; there are no multi-statement
//!   transactions in this layer.
//! - A missing table surfaces as `SchemaMissing`, never as a panic.
//! - Rows are read under the connection lock and handed out as a single-pass
//!   `Records` sequence after the lock is released.

use crate::config::BackendKind;
use crate::db::{open_db, open_db_in_memory};
use crate::error::{StoreError, StoreResult};
use crate::model::entity::{EntityKind, FieldSpec, FieldType, ValidationError};
use crate::store::query::{Predicate, Query, Record, Records, SortDirection};
use crate::store::{observe, record_id, Backend};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend over a local SQLite file.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens the file at `path`, creating and migrating it when needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, crate::db::DbError> {
        Ok(Self::from_ready(open_db(path)?))
    }

    /// Fully migrated private in-memory store.
    pub fn in_memory() -> Result<Self, crate::db::DbError> {
        Ok(Self::from_ready(open_db_in_memory()?))
    }

    /// Adopts an existing connection as-is, without running migrations.
    ///
    /// Tables are looked up on every call, so a connection lacking some
    /// tables still serves the entities whose tables exist.
    pub fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self::from_ready(conn))
    }

    fn from_ready(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self, entity: EntityKind, id: Option<&str>) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::storage(entity, id, "embedded connection lock poisoned"))
    }

    fn select_by_id(conn: &Connection, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1;",
            column_list(entity),
            entity.table()
        );
        let mut stmt = conn.prepare(&sql).map_err(|err| sql_error(entity, Some(id), err))?;
        let mut rows = stmt.query([id]).map_err(|err| sql_error(entity, Some(id), err))?;
        if let Some(row) = rows.next().map_err(|err| sql_error(entity, Some(id), err))? {
            return Ok(Some(decode_row(entity, row)?));
        }
        Ok(None)
    }

    /// Writes `patch` to the row matching `id` and every `expected` value,
    /// then reads it back under the same lock.
    fn write_patch(
        &self,
        entity: EntityKind,
        id: &str,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<Record>> {
        let mut assignments = Vec::with_capacity(patch.len());
        let mut binds = Vec::with_capacity(patch.len() + expected.len() + 1);
        for (name, value) in patch {
            if name == "id" {
                return Err(StoreError::validation(
                    entity,
                    Some(id.to_string()),
                    ValidationError::new("id", "identifier is immutable"),
                ));
            }
            let spec = known_field(entity, Some(id), name)?;
            assignments.push(format!("{} = ?", quote(spec.name)));
            binds.push(to_sql_value(spec, value));
        }
        let (condition, condition_binds) = match_row(entity, id, expected)?;

        let conn = self.lock(entity, Some(id))?;
        ensure_table(&conn, entity, Some(id))?;
        if assignments.is_empty() {
            let sql = format!(
                "SELECT {} FROM {} WHERE {condition};",
                column_list(entity),
                entity.table()
            );
            let mut stmt = conn.prepare(&sql).map_err(|err| sql_error(entity, Some(id), err))?;
            let mut rows = stmt
                .query(params_from_iter(condition_binds))
                .map_err(|err| sql_error(entity, Some(id), err))?;
            return match rows.next().map_err(|err| sql_error(entity, Some(id), err))? {
                Some(row) => Ok(Some(decode_row(entity, row)?)),
                None => Ok(None),
            };
        }

        binds.extend(condition_binds);
        let sql = format!(
            "UPDATE {} SET {} WHERE {condition};",
            entity.table(),
            assignments.join(", ")
        );
        let changed = conn
            .execute(&sql, params_from_iter(binds))
            .map_err(|err| sql_error(entity, Some(id), err))?;
        if changed == 0 {
            return Ok(None);
        }
        Self::select_by_id(&conn, entity, id)
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn get(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        observe(self.kind(), "get", entity, || {
            let conn = self.lock(entity, Some(id))?;
            ensure_table(&conn, entity, Some(id))?;
            Self::select_by_id(&conn, entity, id)
        })
    }

    fn list(&self, entity: EntityKind, query: &Query) -> StoreResult<Records> {
        observe(self.kind(), "list", entity, || {
            query.check(entity)?;
            let (sql, binds) = build_select(entity, query)?;

            let conn = self.lock(entity, None)?;
            ensure_table(&conn, entity, None)?;
            let mut stmt = conn.prepare(&sql).map_err(|err| sql_error(entity, None, err))?;
            let mut rows = stmt
                .query(params_from_iter(binds))
                .map_err(|err| sql_error(entity, None, err))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next().map_err(|err| sql_error(entity, None, err))? {
                records.push(decode_row(entity, row)?);
            }
            Ok(Records::from_vec(records))
        })
    }

    fn insert(&self, entity: EntityKind, record: &Record) -> StoreResult<String> {
        observe(self.kind(), "insert", entity, || {
            let id = record_id(record)
                .ok_or_else(|| {
                    StoreError::validation(entity, None, ValidationError::new("id", "record has no id"))
                })?
                .to_string();

            let mut columns = Vec::with_capacity(record.len());
            let mut binds = Vec::with_capacity(record.len());
            for (name, value) in record {
                let spec = known_field(entity, Some(id.as_str()), name)?;
                columns.push(quote(spec.name));
                binds.push(to_sql_value(spec, value));
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                entity.table(),
                columns.join(", ")
            );

            let conn = self.lock(entity, Some(id.as_str()))?;
            ensure_table(&conn, entity, Some(id.as_str()))?;
            conn.execute(&sql, params_from_iter(binds))
                .map_err(|err| sql_error(entity, Some(id.as_str()), err))?;
            Ok(id)
        })
    }

    fn update(&self, entity: EntityKind, id: &str, patch: &Record) -> StoreResult<Record> {
        observe(self.kind(), "update", entity, || {
            self.write_patch(entity, id, &Record::new(), patch)?
                .ok_or_else(|| StoreError::not_found(entity, id))
        })
    }

    fn update_if(
        &self,
        entity: EntityKind,
        id: &str,
        expected: &Record,
        patch: &Record,
    ) -> StoreResult<Option<Record>> {
        observe(self.kind(), "update_if", entity, || {
            self.write_patch(entity, id, expected, patch)
        })
    }

    fn delete(&self, entity: EntityKind, id: &str) -> StoreResult<()> {
        observe(self.kind(), "delete", entity, || {
            let conn = self.lock(entity, Some(id))?;
            ensure_table(&conn, entity, Some(id))?;
            let changed = conn
                .execute(&format!("DELETE FROM {} WHERE id = ?1;", entity.table()), [id])
                .map_err(|err| sql_error(entity, Some(id), err))?;
            if changed == 0 {
                return Err(StoreError::not_found(entity, id));
            }
            Ok(())
        })
    }
}

fn build_select(entity: EntityKind, query: &Query) -> StoreResult<(String, Vec<SqlValue>)> {
    let mut sql = format!("SELECT {} FROM {} WHERE 1 = 1", column_list(entity), entity.table());
    let mut binds = Vec::new();

    for (field, predicate) in &query.filter {
        let spec = known_field(entity, None, field)?;
        let column = quote(spec.name);
        if spec.ty == FieldType::Json {
            return Err(StoreError::unsupported(
                entity,
                format!("embedded backend cannot filter document field `{field}`"),
            ));
        }
        match predicate {
            Predicate::Eq(Value::Null) => sql.push_str(&format!(" AND {column} IS NULL")),
            Predicate::Eq(value) => {
                sql.push_str(&format!(" AND {column} = ?"));
                binds.push(to_sql_value(spec, value));
            }
            Predicate::Range { lower, upper } => {
                match lower {
                    Bound::Included(value) => {
                        sql.push_str(&format!(" AND {column} >= ?"));
                        binds.push(to_sql_value(spec, value));
                    }
                    Bound::Excluded(value) => {
                        sql.push_str(&format!(" AND {column} > ?"));
                        binds.push(to_sql_value(spec, value));
                    }
                    Bound::Unbounded => {}
                }
                match upper {
                    Bound::Included(value) => {
                        sql.push_str(&format!(" AND {column} <= ?"));
                        binds.push(to_sql_value(spec, value));
                    }
                    Bound::Excluded(value) => {
                        sql.push_str(&format!(" AND {column} < ?"));
                        binds.push(to_sql_value(spec, value));
                    }
                    Bound::Unbounded => {}
                }
            }
            Predicate::In(values) if values.is_empty() => sql.push_str(" AND 0 = 1"),
            Predicate::In(values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!(" AND {column} IN ({placeholders})"));
                binds.extend(values.iter().map(|value| to_sql_value(spec, value)));
            }
            Predicate::Like(pattern) => {
                sql.push_str(&format!(" AND {column} LIKE ?"));
                binds.push(SqlValue::Text(pattern.clone()));
            }
            Predicate::Contains(_) => {
                return Err(StoreError::unsupported(
                    entity,
                    format!("embedded backend cannot evaluate containment on `{field}`"),
                ));
            }
        }
    }

    if query.order.is_empty() {
        sql.push_str(" ORDER BY rowid ASC");
    } else {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|order| {
                let direction = match order.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {direction}", quote(&order.field))
            })
            .collect();
        sql.push_str(&format!(" ORDER BY {}, id ASC", order.join(", ")));
    }

    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        binds.push(SqlValue::Integer(i64::from(limit)));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            binds.push(SqlValue::Integer(i64::from(query.offset)));
        }
    } else if query.offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        binds.push(SqlValue::Integer(i64::from(query.offset)));
    }

    Ok((sql, binds))
}

/// `id = ?` plus one equality per `expected` field.
fn match_row(entity: EntityKind, id: &str, expected: &Record) -> StoreResult<(String, Vec<SqlValue>)> {
    let mut condition = "id = ?".to_string();
    let mut binds = vec![SqlValue::Text(id.to_string())];
    for (name, value) in expected {
        let spec = known_field(entity, Some(id), name)?;
        if value.is_null() {
            condition.push_str(&format!(" AND {} IS NULL", quote(spec.name)));
        } else {
            condition.push_str(&format!(" AND {} = ?", quote(spec.name)));
            binds.push(to_sql_value(spec, value));
        }
    }
    Ok((condition, binds))
}

fn ensure_table(conn: &Connection, entity: EntityKind, id: Option<&str>) -> StoreResult<()> {
    let table = entity.table();
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table});"))
        .map_err(|err| sql_error(entity, None, err))?;
    let mut rows = stmt.query([]).map_err(|err| sql_error(entity, None, err))?;
    let mut columns = HashSet::new();
    while let Some(row) = rows.next().map_err(|err| sql_error(entity, None, err))? {
        let name: String = row.get(1).map_err(|err| sql_error(entity, None, err))?;
        columns.insert(name);
    }

    if columns.is_empty() {
        return Err(StoreError::schema_missing(entity, id));
    }
    if let Some(missing) = entity
        .fields()
        .iter()
        .find(|spec| !columns.contains(spec.name))
    {
        return Err(StoreError::storage(
            entity,
            id,
            format!("table `{table}` lacks column `{}`", missing.name),
        ));
    }
    Ok(())
}

fn known_field(entity: EntityKind, id: Option<&str>, name: &str) -> StoreResult<FieldSpec> {
    entity.field(name).ok_or_else(|| {
        StoreError::validation(
            entity,
            id.map(str::to_string),
            ValidationError::new("record", format!("unknown field `{name}`")),
        )
    })
}

fn column_list(entity: EntityKind) -> String {
    entity
        .fields()
        .iter()
        .map(|spec| quote(spec.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

fn to_sql_value(spec: FieldSpec, value: &Value) -> SqlValue {
    if spec.ty == FieldType::Json {
        return SqlValue::Text(value.to_string());
    }
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn decode_row(entity: EntityKind, row: &rusqlite::Row<'_>) -> StoreResult<Record> {
    let mut record = Record::new();
    for (index, spec) in entity.fields().iter().enumerate() {
        let raw = row
            .get_ref(index)
            .map_err(|err| sql_error(entity, None, err))?;
        record.insert(spec.name.to_string(), from_sql_value(entity, *spec, raw)?);
    }
    Ok(record)
}

fn from_sql_value(entity: EntityKind, spec: FieldSpec, raw: ValueRef<'_>) -> StoreResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(integer) if spec.ty == FieldType::Real => {
            Ok(Number::from_f64(integer as f64).map_or(Value::Null, Value::Number))
        }
        ValueRef::Integer(integer) => Ok(Value::from(integer)),
        ValueRef::Real(real) => Ok(Number::from_f64(real).map_or(Value::Null, Value::Number)),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|_| {
                StoreError::storage(entity, None, format!("column `{}` is not UTF-8", spec.name))
            })?;
            if spec.ty == FieldType::Json {
                return serde_json::from_str(text).map_err(|err| {
                    StoreError::storage(
                        entity,
                        None,
                        format!("column `{}` holds invalid JSON: {err}", spec.name),
                    )
                });
            }
            Ok(Value::String(text.to_string()))
        }
        ValueRef::Blob(_) => Err(StoreError::storage(
            entity,
            None,
            format!("column `{}` holds a blob", spec.name),
        )),
    }
}

fn sql_error(entity: EntityKind, id: Option<&str>, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if message.starts_with("no such table") {
            return StoreError::schema_missing(entity, id);
        }
        if failure.code == ErrorCode::ConstraintViolation {
            return StoreError::storage(entity, id, format!("constraint violated: {message}"));
        }
    }
    StoreError::storage(entity, id, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::build_select;
    use crate::error::ErrorKind;
    use crate::model::entity::EntityKind;
    use crate::store::query::{Predicate, Query};
    use serde_json::json;

    #[test]
    fn build_select_binds_range_bounds_in_order() {
        let query = Query::new().between("amount", 10, 20).limit(5);
        let (sql, binds) = build_select(EntityKind::PaymentMilestone, &query).unwrap();
        assert!(sql.contains("\"amount\" >= ? AND \"amount\" < ?"));
        assert!(sql.ends_with("LIMIT ?"));
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn build_select_rejects_containment() {
        let query = Query::new().filter("metadata", Predicate::Contains(json!({"k": 1})));
        let err = build_select(EntityKind::PaymentMilestone, &query).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedQuery);
    }
}
