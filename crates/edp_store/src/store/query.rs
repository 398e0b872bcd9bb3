//! Backend-neutral records, filters and result sequences.
//!
//! # Responsibility
//! - Define the record shape exchanged with adapters and the cache.
//! - Describe list queries as data so each adapter can translate them.
//! - Produce a canonical signature for list cache keys.
//!
//! # Invariants
//! - Filter and order fields must exist in the entity schema.
//! - `Eq`, `Range` and `In` operands are JSON scalars (`Eq(Null)` means
//!   "is null"); other shapes are rejected before any read.

use crate::error::{StoreError, StoreResult};
use crate::model::entity::EntityKind;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Flat field→value map exchanged with backends.
pub type Record = Map<String, Value>;

/// Condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Range {
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    In(Vec<Value>),
    /// SQL `LIKE` pattern using `%` and `_` wildcards.
    Like(String),
    /// JSON containment on a document field.
    Contains(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Filtered, ordered list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: BTreeMap<String, Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.filter.insert(field.into(), predicate);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Predicate::Eq(value.into()))
    }

    /// Half-open range `[from, to)`.
    pub fn between(self, field: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        self.filter(
            field,
            Predicate::Range {
                lower: Bound::Included(from.into()),
                upper: Bound::Excluded(to.into()),
            },
        )
    }

    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Rejects fields and operand shapes no backend can express.
    ///
    /// Adapters call this first, then refuse the predicates they personally
    /// cannot translate.
    pub fn check(&self, kind: EntityKind) -> StoreResult<()> {
        for (field, predicate) in &self.filter {
            if kind.field(field).is_none() {
                return Err(StoreError::unsupported(
                    kind,
                    format!("unknown filter field `{field}`"),
                ));
            }
            check_predicate(kind, field, predicate)?;
        }
        for order in &self.order {
            if kind.field(&order.field).is_none() {
                return Err(StoreError::unsupported(
                    kind,
                    format!("unknown order field `{}`", order.field),
                ));
            }
        }
        Ok(())
    }

    /// Canonical text form; equal queries always produce equal signatures.
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = self
            .filter
            .iter()
            .map(|(field, predicate)| format!("{field}{}", predicate_signature(predicate)))
            .collect();
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|order| format!("{}.{}", order.field, order.direction.as_str()))
                .collect();
            parts.push(format!("order={}", order.join(",")));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        if self.offset > 0 {
            parts.push(format!("offset={}", self.offset));
        }
        if parts.is_empty() {
            return "all".to_string();
        }
        parts.join("&")
    }
}

fn check_predicate(kind: EntityKind, field: &str, predicate: &Predicate) -> StoreResult<()> {
    let scalar_only = |value: &Value| -> StoreResult<()> {
        if value.is_array() || value.is_object() {
            return Err(StoreError::unsupported(
                kind,
                format!("field `{field}` compares against a non-scalar value"),
            ));
        }
        Ok(())
    };

    match predicate {
        Predicate::Eq(value) => scalar_only(value),
        Predicate::Range { lower, upper } => {
            if matches!((lower, upper), (Bound::Unbounded, Bound::Unbounded)) {
                return Err(StoreError::unsupported(
                    kind,
                    format!("range on `{field}` has no bounds"),
                ));
            }
            for bound in [lower, upper] {
                if let Bound::Included(value) | Bound::Excluded(value) = bound {
                    if value.is_null() {
                        return Err(StoreError::unsupported(
                            kind,
                            format!("range on `{field}` has a null bound"),
                        ));
                    }
                    scalar_only(value)?;
                }
            }
            Ok(())
        }
        Predicate::In(values) => {
            for value in values {
                if value.is_null() {
                    return Err(StoreError::unsupported(
                        kind,
                        format!("`in` list on `{field}` contains null"),
                    ));
                }
                scalar_only(value)?;
            }
            Ok(())
        }
        Predicate::Like(_) | Predicate::Contains(_) => Ok(()),
    }
}

fn predicate_signature(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Eq(value) => format!("=eq:{value}"),
        Predicate::Range { lower, upper } => {
            let lower = match lower {
                Bound::Included(value) => format!("[{value}"),
                Bound::Excluded(value) => format!("({value}"),
                Bound::Unbounded => "(*".to_string(),
            };
            let upper = match upper {
                Bound::Included(value) => format!("{value}]"),
                Bound::Excluded(value) => format!("{value})"),
                Bound::Unbounded => "*)".to_string(),
            };
            format!("=range:{lower},{upper}")
        }
        Predicate::In(values) => {
            let values: Vec<String> = values.iter().map(Value::to_string).collect();
            format!("=in:[{}]", values.join(","))
        }
        Predicate::Like(pattern) => format!("=like:{}", Value::from(pattern.as_str())),
        Predicate::Contains(value) => format!("=cs:{value}"),
    }
}

/// Finite, single-pass sequence of list results.
///
/// Both adapters materialize the full result before handing it out, so
/// iterating never touches the backend again.
pub struct Records {
    inner: Box<dyn Iterator<Item = Record> + Send>,
}

impl Records {
    pub fn new(inner: impl Iterator<Item = Record> + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn from_vec(records: Vec<Record>) -> Self {
        Self::new(records.into_iter())
    }
}

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::{Predicate, Query};
    use crate::error::ErrorKind;
    use crate::model::entity::EntityKind;
    use serde_json::json;

    #[test]
    fn signature_is_independent_of_filter_insertion_order() {
        let first = Query::new().eq("status", "pending").eq("currency", "CLP");
        let second = Query::new().eq("currency", "CLP").eq("status", "pending");
        assert_eq!(first.signature(), second.signature());
        assert_ne!(first.signature(), Query::new().signature());
    }

    #[test]
    fn signature_distinguishes_order_and_paging() {
        let base = Query::new().eq("status", "pending");
        let ordered = base.clone().order_desc("created_at");
        let paged = base.clone().limit(5);
        assert_ne!(base.signature(), ordered.signature());
        assert_ne!(base.signature(), paged.signature());
    }

    #[test]
    fn check_rejects_unknown_fields_and_non_scalar_operands() {
        let unknown = Query::new().eq("colour", "red");
        let err = unknown.check(EntityKind::PaymentMilestone).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedQuery);

        let nested = Query::new().eq("metadata", json!({"a": 1}));
        assert!(nested.check(EntityKind::PaymentMilestone).is_err());

        let unbounded = Query::new().filter(
            "amount",
            Predicate::Range {
                lower: std::ops::Bound::Unbounded,
                upper: std::ops::Bound::Unbounded,
            },
        );
        assert!(unbounded.check(EntityKind::PaymentMilestone).is_err());

        let fine = Query::new().between("amount", 10, 20).order_asc("created_at");
        fine.check(EntityKind::PaymentMilestone).unwrap();
    }
}
