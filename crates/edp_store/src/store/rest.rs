//! Remote adapter over a REST-exposed relational store.
//!
//! # Responsibility
//! - Translate each backend call into exactly one HTTP request.
//! - Encode filters with PostgREST query conventions (`field=op.value`).
//! - Classify HTTP outcomes into the store error taxonomy.
//!
//! # Invariants
//! - Every request carries the bearer credential; the credential is never
//!   logged or included in errors.
//! - 200/201/204 succeed, 404 is not-found, 401/403 are `AuthFailure`, every
//!   other status and every network failure or timeout is `Transient`.
//! - Unsupported predicate shapes fail before any request is sent.

use crate::config::BackendKind;
use crate::error::{StoreError, StoreResult};
use crate::model::entity::EntityKind;
use crate::store::query::{Predicate, Query, Record, Records};
use crate::store::{observe, record_id, Backend};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::ops::Bound;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const PREFER_REPRESENTATION: &str = "return=representation";

/// Connection settings for the remote store.
#[derive(Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Debug for RestConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Backend over HTTP.
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(CONNECT_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn request(&self, method: Method, entity: EntityKind) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, entity.table()))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(ACCEPT, "application/json")
    }

    fn send(&self, entity: EntityKind, id: Option<&str>, request: RequestBuilder) -> StoreResult<Response> {
        let response = request.send().map_err(|err| network_error(entity, id, &err))?;
        check_status(entity, id, response.status().as_u16())?;
        Ok(response)
    }
}

impl Backend for RestBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn get(&self, entity: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        observe(self.kind(), "get", entity, || {
            let request = self
                .request(Method::GET, entity)
                .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())]);
            match self.send(entity, Some(id), request) {
                Ok(response) => Ok(read_rows(entity, Some(id), response)?.into_iter().next()),
                Err(StoreError::NotFound { .. }) => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn list(&self, entity: EntityKind, query: &Query) -> StoreResult<Records> {
        observe(self.kind(), "list", entity, || {
            query.check(entity)?;
            let params = encode_query(entity, query)?;
            let request = self.request(Method::GET, entity).query(&params);
            let response = self.send(entity, None, request)?;
            Ok(Records::from_vec(read_rows(entity, None, response)?))
        })
    }

    fn insert(&self, entity: EntityKind, record: &Record) -> StoreResult<String> {
        observe(self.kind(), "insert", entity, || {
            let id = record_id(record);
            let request = self
                .request(Method::POST, entity)
                .header("Prefer", PREFER_REPRESENTATION)
                .json(record);
            let response = self.send(entity, id, request)?;
            let rows = read_rows(entity, id, response)?;
            rows.first()
                .and_then(record_id)
                .or(id)
                .map(str::to_string)
                .ok_or_else(|| StoreError::storage(entity, None, "insert response carried no id"))
        })
    }

    fn update(&self, entity: EntityKind, id: &str, patch: &Record) -> StoreResult<Record> {
        if patch.is_empty() {
            return self
                .get(entity, id)?
                .ok_or_else(|| StoreError::not_found(entity, id));
        }
        observe(self.kind(), "update", entity, || {
            let request = self
                .request(Method::PATCH, entity)
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", PREFER_REPRESENTATION)
                .json(patch);
            let response = self.send(entity, Some(id), request)?;
            read_rows(entity, Some(id), response)?
                .into_iter()
                .next()
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
        let matcher = expected
            .iter()
            .fold(Query::new().eq("id", id), |query, (field, value)| {
                query.eq(field.clone(), value.clone())
            });
        matcher.check(entity)?;
        let params = encode_query(entity, &matcher)?;
        let method = if patch.is_empty() { Method::GET } else { Method::PATCH };
        observe(self.kind(), "update_if", entity, || {
            let mut request = self.request(method, entity).query(&params);
            if !patch.is_empty() {
                request = request.header("Prefer", PREFER_REPRESENTATION).json(patch);
            }
            match self.send(entity, Some(id), request) {
                Ok(response) => Ok(read_rows(entity, Some(id), response)?.into_iter().next()),
                Err(StoreError::NotFound { .. }) => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn delete(&self, entity: EntityKind, id: &str) -> StoreResult<()> {
        observe(self.kind(), "delete", entity, || {
            let request = self
                .request(Method::DELETE, entity)
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", PREFER_REPRESENTATION);
            let response = self.send(entity, Some(id), request)?;
            if response.status().as_u16() == 204 {
                return Ok(());
            }
            if read_rows(entity, Some(id), response)?.is_empty() {
                return Err(StoreError::not_found(entity, id));
            }
            Ok(())
        })
    }
}

fn check_status(entity: EntityKind, id: Option<&str>, status: u16) -> StoreResult<()> {
    match status {
        200 | 201 | 204 => Ok(()),
        404 => Err(StoreError::not_found(entity, id.unwrap_or("*"))),
        401 | 403 => Err(StoreError::auth_failure(entity, id, status)),
        other => Err(StoreError::transient(entity, id, format!("HTTP {other}"))),
    }
}

fn network_error(entity: EntityKind, id: Option<&str>, err: &reqwest::Error) -> StoreError {
    let reason = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    // reqwest error text includes the URL, never headers.
    StoreError::transient(entity, id, format!("{reason}: {err}"))
}

fn read_rows(entity: EntityKind, id: Option<&str>, response: Response) -> StoreResult<Vec<Record>> {
    if response.status().as_u16() == 204 {
        return Ok(Vec::new());
    }
    let body = response
        .text()
        .map_err(|err| network_error(entity, id, &err))?;
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Value = serde_json::from_str(&body).map_err(|err| {
        StoreError::storage(entity, id, format!("response is not JSON: {err}"))
    })?;
    match parsed {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                _ => Err(StoreError::storage(entity, id, "response row is not an object")),
            })
            .collect(),
        Value::Object(record) => Ok(vec![record]),
        _ => Err(StoreError::storage(entity, id, "response is neither a row nor a row list")),
    }
}

fn encode_query(entity: EntityKind, query: &Query) -> StoreResult<Vec<(String, String)>> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for (field, predicate) in &query.filter {
        match predicate {
            Predicate::Eq(Value::Null) => params.push((field.clone(), "is.null".to_string())),
            Predicate::Eq(value) => params.push((field.clone(), format!("eq.{}", scalar_text(value)))),
            Predicate::Range { lower, upper } => {
                match lower {
                    Bound::Included(value) => {
                        params.push((field.clone(), format!("gte.{}", scalar_text(value))))
                    }
                    Bound::Excluded(value) => {
                        params.push((field.clone(), format!("gt.{}", scalar_text(value))))
                    }
                    Bound::Unbounded => {}
                }
                match upper {
                    Bound::Included(value) => {
                        params.push((field.clone(), format!("lte.{}", scalar_text(value))))
                    }
                    Bound::Excluded(value) => {
                        params.push((field.clone(), format!("lt.{}", scalar_text(value))))
                    }
                    Bound::Unbounded => {}
                }
            }
            Predicate::In(values) => {
                let items: Vec<String> = values.iter().map(quoted_list_item).collect();
                params.push((field.clone(), format!("in.({})", items.join(","))));
            }
            Predicate::Like(pattern) => params.push((field.clone(), format!("like.{pattern}"))),
            Predicate::Contains(value) if value.is_array() || value.is_object() => {
                params.push((field.clone(), format!("cs.{value}")))
            }
            Predicate::Contains(_) => {
                return Err(StoreError::unsupported(
                    entity,
                    format!("containment on `{field}` needs an array or object operand"),
                ));
            }
        }
    }

    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|order| format!("{}.{}", order.field, order.direction.as_str()))
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if query.offset > 0 {
        params.push(("offset".to_string(), query.offset.to_string()));
    }
    Ok(params)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn quoted_list_item(value: &Value) -> String {
    match value {
        Value::String(text) => format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"")),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_status, encode_query};
    use crate::error::ErrorKind;
    use crate::model::entity::EntityKind;
    use crate::store::query::{Predicate, Query};
    use serde_json::json;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let entity = EntityKind::Project;
        assert!(check_status(entity, None, 200).is_ok());
        assert!(check_status(entity, None, 201).is_ok());
        assert!(check_status(entity, None, 204).is_ok());
        assert_eq!(check_status(entity, Some("x"), 404).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(check_status(entity, None, 401).unwrap_err().kind(), ErrorKind::AuthFailure);
        assert_eq!(check_status(entity, None, 403).unwrap_err().kind(), ErrorKind::AuthFailure);
        assert_eq!(check_status(entity, None, 503).unwrap_err().kind(), ErrorKind::Transient);
        assert_eq!(check_status(entity, None, 409).unwrap_err().kind(), ErrorKind::Transient);
    }

    #[test]
    fn filters_use_postgrest_operators() {
        let query = Query::new()
            .eq("status", "pending")
            .eq("currency", serde_json::Value::Null)
            .between("amount", 100, 200)
            .filter("project_id", Predicate::In(vec![json!("a,b"), json!("c")]))
            .order_desc("created_at")
            .limit(10);
        let params = encode_query(EntityKind::PaymentMilestone, &query).unwrap();

        assert_eq!(param(&params, "status"), vec!["eq.pending"]);
        assert_eq!(param(&params, "currency"), vec!["is.null"]);
        assert_eq!(param(&params, "amount"), vec!["gte.100", "lt.200"]);
        assert_eq!(param(&params, "project_id"), vec!["in.(\"a,b\",\"c\")"]);
        assert_eq!(param(&params, "order"), vec!["created_at.desc"]);
        assert_eq!(param(&params, "limit"), vec!["10"]);
    }

    #[test]
    fn scalar_containment_is_unsupported() {
        let query = Query::new().filter("metadata", Predicate::Contains(json!(3)));
        let err = encode_query(EntityKind::PaymentMilestone, &query).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedQuery);
    }
}
