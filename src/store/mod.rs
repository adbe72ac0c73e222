//! Document-store surface used by the lifecycle: point reads, filtered
//! queries, field-level patches, sub-collection appends and atomic batches.

pub mod backend;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "solicitud")]
    Requests,
    #[serde(rename = "cotizaciones")]
    Quotes,
    #[serde(rename = "deliveries")]
    Deliveries,
    #[serde(rename = "users")]
    Users,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Requests => "solicitud",
            Collection::Quotes => "cotizaciones",
            Collection::Deliveries => "deliveries",
            Collection::Users => "users",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub data: Fields,
}

impl Document {
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, path)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection}/{id} does not exist")]
    NotFound { collection: &'static str, id: String },

    #[error("{collection}/{id} changed concurrently (expected version {expected}, found {found})")]
    Conflict {
        collection: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("{collection}/{id} already exists")]
    AlreadyExists { collection: &'static str, id: String },

    #[error("{0}")]
    Serialization(String),

    #[error("{0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fresh document id.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Query predicate. Absent fields compare as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    /// Present, non-null and not an empty string.
    Exists(String),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::NotIn(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn exists(field: &str) -> Self {
        Filter::Exists(field.to_string())
    }

    pub fn matches(&self, data: &Fields) -> bool {
        match self {
            Filter::Eq(field, expected) => field_or_null(data, field) == expected,
            Filter::In(field, values) => values.contains(field_or_null(data, field)),
            Filter::NotIn(field, values) => !values.contains(field_or_null(data, field)),
            Filter::Exists(field) => match lookup(data, field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Delete,
    ServerTimestamp,
    ArrayUnion(Vec<Value>),
    Increment(f64),
}

/// Partial update. Keys may be dotted paths addressing nested objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<(String, FieldOp)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push((path.to_string(), FieldOp::Set(value.into())));
        self
    }

    pub fn delete(mut self, path: &str) -> Self {
        self.ops.push((path.to_string(), FieldOp::Delete));
        self
    }

    pub fn server_timestamp(mut self, path: &str) -> Self {
        self.ops.push((path.to_string(), FieldOp::ServerTimestamp));
        self
    }

    pub fn array_union(mut self, path: &str, values: Vec<Value>) -> Self {
        self.ops.push((path.to_string(), FieldOp::ArrayUnion(values)));
        self
    }

    pub fn increment(mut self, path: &str, by: f64) -> Self {
        self.ops.push((path.to_string(), FieldOp::Increment(by)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn apply(&self, data: &mut Fields, now: DateTime<Utc>) {
        for (path, op) in &self.ops {
            match op {
                FieldOp::Set(value) => set_path(data, path, value.clone()),
                FieldOp::Delete => remove_path(data, path),
                FieldOp::ServerTimestamp => {
                    set_path(data, path, Value::String(now.to_rfc3339()))
                }
                FieldOp::ArrayUnion(values) => {
                    let mut merged = match lookup(data, path) {
                        Some(Value::Array(existing)) => existing.clone(),
                        _ => Vec::new(),
                    };
                    for value in values {
                        if !merged.contains(value) {
                            merged.push(value.clone());
                        }
                    }
                    set_path(data, path, Value::Array(merged));
                }
                FieldOp::Increment(by) => {
                    let current = lookup(data, path).and_then(Value::as_f64).unwrap_or(0.0);
                    set_path(data, path, number_value(current + by));
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create {
        collection: Collection,
        id: String,
        data: Fields,
    },
    Patch {
        collection: Collection,
        id: String,
        patch: Patch,
        expected_version: Option<u64>,
    },
    Append {
        collection: Collection,
        parent_id: String,
        sub: String,
        id: String,
        data: Fields,
    },
}

/// Writes applied all-or-nothing by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, collection: Collection, id: &str, data: Fields) -> Self {
        self.ops.push(WriteOp::Create {
            collection,
            id: id.to_string(),
            data,
        });
        self
    }

    pub fn patch(mut self, collection: Collection, id: &str, patch: Patch) -> Self {
        self.ops.push(WriteOp::Patch {
            collection,
            id: id.to_string(),
            patch,
            expected_version: None,
        });
        self
    }

    /// Patch that only applies if the document is still at `version`.
    pub fn patch_if(
        mut self,
        collection: Collection,
        id: &str,
        version: u64,
        patch: Patch,
    ) -> Self {
        self.ops.push(WriteOp::Patch {
            collection,
            id: id.to_string(),
            patch,
            expected_version: Some(version),
        });
        self
    }

    pub fn append(mut self, collection: Collection, parent_id: &str, sub: &str, data: Fields) -> Self {
        self.ops.push(WriteOp::Append {
            collection,
            parent_id: parent_id.to_string(),
            sub: sub.to_string(),
            id: new_id(),
            data,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Appended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: String,
    pub kind: ChangeKind,
    pub version: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: Collection, filters: &[Filter]) -> StoreResult<Vec<Document>>;

    async fn list_sub(
        &self,
        collection: Collection,
        parent_id: &str,
        sub: &str,
    ) -> StoreResult<Vec<Document>>;

    /// Applies every write or none. Patches carrying an expected version
    /// fail the whole batch with [`StoreError::Conflict`] on mismatch.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    async fn insert(&self, collection: Collection, data: Fields) -> StoreResult<String> {
        let id = new_id();
        self.commit(WriteBatch::new().create(collection, &id, data))
            .await?;
        Ok(id)
    }

    async fn put(&self, collection: Collection, id: &str, data: Fields) -> StoreResult<()> {
        self.commit(WriteBatch::new().create(collection, id, data))
            .await
    }

    async fn patch(&self, collection: Collection, id: &str, patch: Patch) -> StoreResult<()> {
        self.commit(WriteBatch::new().patch(collection, id, patch))
            .await
    }

    async fn append(
        &self,
        collection: Collection,
        parent_id: &str,
        sub: &str,
        data: Fields,
    ) -> StoreResult<()> {
        self.commit(WriteBatch::new().append(collection, parent_id, sub, data))
            .await
    }
}

pub fn lookup<'a>(data: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = data.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn field_or_null<'a>(data: &'a Fields, path: &str) -> &'a Value {
    lookup(data, path).unwrap_or(&Value::Null)
}

fn set_path(data: &mut Fields, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            data.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = data
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Fields::new()));
            if !entry.is_object() {
                *entry = Value::Object(Fields::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

fn remove_path(data: &mut Fields, path: &str) {
    match path.split_once('.') {
        None => {
            data.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = data.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn absent_fields_match_not_in_but_not_exists() {
        let data = fields(json!({ "title": "Box" }));
        assert!(Filter::not_in("status", ["confirmado", "denegado"]).matches(&data));
        assert!(!Filter::exists("driverId").matches(&data));
        assert!(!Filter::is_in("status", ["confirmado"]).matches(&data));
    }

    #[test]
    fn exists_rejects_empty_strings() {
        let data = fields(json!({ "driverId": "" }));
        assert!(!Filter::exists("driverId").matches(&data));
        let data = fields(json!({ "driverId": "drv-1" }));
        assert!(Filter::exists("driverId").matches(&data));
    }

    #[test]
    fn nested_paths_are_created_and_updated() {
        let mut data = fields(json!({ "pricing": { "mode": "bidding", "bids": [1] } }));
        let now = Utc::now();
        Patch::new()
            .array_union("pricing.bids", vec![json!(1), json!(2)])
            .set("driverLocation.lat", 4.6)
            .apply(&mut data, now);

        assert_eq!(data["pricing"]["bids"], json!([1, 2]));
        assert_eq!(data["pricing"]["mode"], "bidding");
        assert_eq!(data["driverLocation"]["lat"], 4.6);
    }

    #[test]
    fn increment_starts_from_zero_and_keeps_integers() {
        let mut data = Fields::new();
        let now = Utc::now();
        Patch::new()
            .increment("cancellations", 1.0)
            .increment("totalEarnings", 12.5)
            .apply(&mut data, now);
        Patch::new().increment("cancellations", 1.0).apply(&mut data, now);

        assert_eq!(data["cancellations"], json!(2));
        assert_eq!(data["totalEarnings"], json!(12.5));
    }

    #[test]
    fn delete_and_server_timestamp() {
        let mut data = fields(json!({ "driverId": "x", "meta": { "a": 1, "b": 2 } }));
        let now = Utc::now();
        Patch::new()
            .delete("driverId")
            .delete("meta.a")
            .server_timestamp("updatedAt")
            .apply(&mut data, now);

        assert!(data.get("driverId").is_none());
        assert_eq!(data["meta"], json!({ "b": 2 }));
        assert_eq!(data["updatedAt"], json!(now.to_rfc3339()));
    }
}
