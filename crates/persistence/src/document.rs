//! Document identity helpers.
//!
//! Every stored document carries a collection-scoped sequential `id` and a
//! globally unique `uid`. Either one addresses the document.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A stored document: field name to arbitrary JSON value.
pub type Document = Map<String, Value>;

/// Sequential identity field.
pub const ID_FIELD: &str = "id";
/// Globally unique identity field.
pub const UID_FIELD: &str = "uid";
/// Creation timestamp field.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Last-modification timestamp field.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Returns true if `doc` is addressed by `key` through its `id` or `uid`.
pub fn matches_key(doc: &Document, key: &str) -> bool {
    [ID_FIELD, UID_FIELD]
        .iter()
        .any(|field| doc.get(*field).is_some_and(|v| identity_eq(v, key)))
}

fn identity_eq(value: &Value, key: &str) -> bool {
    match value {
        Value::String(s) => s == key,
        Value::Number(n) => n.to_string() == key,
        _ => false,
    }
}

/// Next sequential id: one past the largest numeric id, starting at 1.
///
/// Ids that do not parse as unsigned integers are ignored. `None` once the
/// largest id is `u64::MAX`.
pub fn next_id(docs: &[Document]) -> Option<String> {
    let max = docs
        .iter()
        .filter_map(|doc| match doc.get(ID_FIELD)? {
            Value::String(s) => s.parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    max.checked_add(1).map(|id| id.to_string())
}

/// Fresh opaque uid.
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as an RFC 3339 UTC string.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Shallow merge: top-level fields of `updates` replace those of `base`.
///
/// Identity fields are never overwritten.
pub fn shallow_merge(base: &Document, updates: &Document) -> Document {
    let mut merged = base.clone();
    for (field, value) in updates {
        if field == ID_FIELD || field == UID_FIELD {
            continue;
        }
        merged.insert(field.clone(), value.clone());
    }
    merged
}

/// Exact-equality match on every listed field (AND semantics).
pub fn matches_all(doc: &Document, fields: &Document) -> bool {
    fields
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}
