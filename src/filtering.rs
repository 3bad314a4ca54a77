//! Structured predicate filters evaluated against library/document/chunk metadata.
//!
//! A [`Filters`] value is a `{chunk?, document?, library?}` triple of dotted-path
//! clause maps, parsed once from the wire request and then evaluated per
//! candidate during search's pre-filter pass. All clauses under one field are
//! ANDed, all fields are ANDed, and the three sub-dicts are ANDed across
//! levels — there is no `Or`/`Not` in the wire grammar, only conjunction.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{Chunk, Document, Library};

/// `field path -> {op: argument}`.
pub type FieldClauses = HashMap<String, HashMap<String, Value>>;

/// The request-level filter tree: one optional clause map per entity level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<FieldClauses>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<FieldClauses>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<FieldClauses>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.chunk.is_none() && self.document.is_none() && self.library.is_none()
    }
}

/// Project a chunk into the JSON shape filter paths resolve against:
/// `id`, `library_id`, `document_id`, `text`, `metadata.*` (= `chunk_meta`).
fn chunk_view(chunk: &Chunk) -> Value {
    json!({
        "id": chunk.id,
        "library_id": chunk.library_id,
        "document_id": chunk.document_id,
        "text": chunk.text,
        "metadata": serde_json::to_value(&chunk.chunk_meta).unwrap_or(Value::Null),
    })
}

fn document_view(document: &Document) -> Value {
    json!({
        "id": document.id,
        "library_id": document.library_id,
        "title": document.title,
        "metadata": serde_json::to_value(&document.document_meta).unwrap_or(Value::Null),
    })
}

fn library_view(library: &Library) -> Value {
    json!({
        "id": library.id,
        "name": library.name,
        "description": library.description,
        "metadata": serde_json::to_value(&library.library_meta).unwrap_or(Value::Null),
    })
}

/// Walk a dotted path through a JSON value, attribute-then-key. Missing
/// segments resolve to `Value::Null`.
fn resolve_path<'a>(root: &'a Value, path: &str) -> &'a Value {
    let mut cur = root;
    for segment in path.split('.') {
        match cur.get(segment) {
            Some(v) => cur = v,
            None => return &Value::Null,
        }
    }
    cur
}

fn as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    a == b
}

fn compare_values(path: &str, a: &Value, b: &Value) -> Option<Ordering> {
    if path.ends_with("created_at") {
        let (ta, tb) = (as_timestamp(a)?, as_timestamp(b)?);
        return ta.partial_cmp(&tb);
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

/// Evaluate a single `{op: arg}` clause against a resolved field value.
/// Unknown operators are a forward-compatible no-op (always pass).
fn eval_clause(path: &str, value: &Value, op: &str, arg: &Value) -> bool {
    if value.is_null() {
        return op == "eq" && arg.is_null();
    }
    match op {
        "eq" => values_equal(value, arg),
        "neq" => !values_equal(value, arg),
        "in" => arg
            .as_array()
            .map(|arr| arr.iter().any(|v| values_equal(v, value)))
            .unwrap_or(false),
        "contains" => match (value.as_str(), arg.as_str()) {
            (Some(s), Some(sub)) => s.contains(sub),
            _ => false,
        },
        "contains_any" => match (value.as_str(), arg.as_array()) {
            (Some(s), Some(arr)) => arr.iter().filter_map(|v| v.as_str()).any(|sub| s.contains(sub)),
            _ => false,
        },
        "any" => match value.as_array() {
            Some(arr) => match arg.as_array() {
                Some(other) => arr.iter().any(|v| other.iter().any(|o| values_equal(v, o))),
                None => arr.iter().any(|v| values_equal(v, arg)),
            },
            None => false,
        },
        ">=" | "<=" | ">" | "<" => compare_values(path, value, arg)
            .map(|ord| match op {
                ">=" => ord != Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                "<" => ord == Ordering::Less,
                _ => unreachable!(),
            })
            .unwrap_or(false),
        _ => true,
    }
}

fn eval_field_clauses(view: &Value, clauses: &FieldClauses) -> bool {
    clauses.iter().all(|(path, ops)| {
        let value = resolve_path(view, path);
        ops.iter().all(|(op, arg)| eval_clause(path, value, op, arg))
    })
}

/// Evaluate a full [`Filters`] tree against one chunk and its owning document
/// and library. Absent sub-dicts trivially pass.
pub fn matches(filters: &Filters, chunk: &Chunk, document: &Document, library: &Library) -> bool {
    if let Some(clauses) = &filters.chunk {
        if !eval_field_clauses(&chunk_view(chunk), clauses) {
            return false;
        }
    }
    if let Some(clauses) = &filters.document {
        if !eval_field_clauses(&document_view(document), clauses) {
            return false;
        }
    }
    if let Some(clauses) = &filters.library {
        if !eval_field_clauses(&library_view(library), clauses) {
            return false;
        }
    }
    true
}
