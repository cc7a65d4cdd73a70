//! Result assembly
//!
//! [`ResultSet`] is what execution produces; [`QueryOutput`] is the
//! client-facing `{data, meta, warnings}` document built from it.

use super::aggregate::row_value;
use super::ast::{FieldPath, PathSegment};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// A fan-out member that failed while the engine ran in skip mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFailure {
    /// `id` of the parent record
    pub record_id: Value,
    /// Relationship name, or `exists:<entity>` for a subquery
    pub relationship: String,
    pub error: String,
}

/// Output of one live execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub records: Vec<Value>,
    /// Aggregate rows, present when the query aggregates
    pub groups: Option<Vec<Map<String, Value>>>,
    pub truncated: bool,
    pub api_calls_made: u64,
    /// Resume token when more results are available
    pub cursor: Option<String>,
    /// Whether results remain beyond this page
    pub has_more: bool,
    pub failures: Vec<MemberFailure>,
}

impl ResultSet {
    /// Build the client-facing document
    pub fn into_output(
        self,
        select: Option<&[FieldPath]>,
        keep: &[String],
        duration: Duration,
        warnings: Vec<String>,
    ) -> QueryOutput {
        let pagination = (self.has_more || self.cursor.is_some()).then(|| Pagination {
            has_more: self.has_more,
            next_cursor: self.cursor.clone(),
        });

        let data = match self.groups {
            Some(rows) => rows
                .into_iter()
                .map(|row| match select {
                    Some(paths) => project_row(row, paths),
                    None => Value::Object(row),
                })
                .collect(),
            None => match select {
                Some(paths) => self
                    .records
                    .iter()
                    .map(|record| project(record, paths, keep))
                    .collect(),
                None => self.records,
            },
        };

        QueryOutput {
            data,
            meta: ResultMeta {
                duration_ms: duration.as_millis() as u64,
                api_calls_made: self.api_calls_made,
                truncated: self.truncated,
                pagination,
                failures: self.failures,
            },
            warnings,
        }
    }
}

/// Live-run response body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput {
    pub data: Vec<Value>,
    pub meta: ResultMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    pub duration_ms: u64,
    pub api_calls_made: u64,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<MemberFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Apply a `select` projection to one record.
///
/// Dotted paths rebuild nested objects, `fields.*` copies the whole `fields`
/// object and paths that resolve to nothing are left out. Keys in `keep`
/// (included relationships) are always carried over.
pub fn project(record: &Value, select: &[FieldPath], keep: &[String]) -> Value {
    let mut out = Map::new();

    for path in select {
        match path.segments.as_slice() {
            [PathSegment::Key(root), PathSegment::Key(star)] if root == "fields" && star == "*" => {
                if let Some(Value::Object(fields)) = record.get("fields") {
                    let target = out
                        .entry("fields".to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(target) = target {
                        for (name, value) in fields {
                            target.insert(name.clone(), value.clone());
                        }
                    }
                }
            }
            _ => {
                if let Some(value) = path.resolve(record) {
                    path.insert_into(&mut out, value.into_owned());
                }
            }
        }
    }

    for key in keep {
        if let Some(value) = record.get(key) {
            out.insert(key.clone(), value.clone());
        }
    }

    Value::Object(out)
}

/// Apply a `select` projection to one aggregate row.
///
/// The group key keeps its flat `groupBy` name; other paths project as usual.
pub fn project_row(row: Map<String, Value>, select: &[FieldPath]) -> Value {
    let row = Value::Object(row);
    let mut out = Map::new();

    for path in select {
        if let Some(value) = row.get(path.as_str()) {
            out.insert(path.as_str().to_string(), value.clone());
        } else if let Some(value) = row_value(&row, path) {
            path.insert_into(&mut out, value.into_owned());
        }
    }

    Value::Object(out)
}
