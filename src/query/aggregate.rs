//! Aggregation Engine
//!
//! Computes an [`AggregateSpec`] over a list of records, optionally
//! partitioned by a group key, and filters the resulting rows with `having`.
//!
//! - `count: true` counts rows, `count: "field"` counts non-null values
//! - `sum`, `avg`, `min`, `max` read numeric values and skip everything else
//! - `percentile` is nearest-rank: the `ceil(p/100 * n)`-th smallest value
//! - `first` / `last` read the field from the first / last record in input order
//! - derived aggregates run after their inputs (evaluation order is computed at parse time)

use super::ast::{AggregateFunc, AggregateSpec, CountTarget, DerivedOp, FieldPath, Operand, WhereClause};
use super::filter::Evaluator;
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::collections::HashMap;

/// Display key for records whose group value is missing or null
pub const NO_VALUE_GROUP: &str = "(no value)";

/// Compute every aggregate over `records`
pub fn compute_aggregates(spec: &AggregateSpec, records: &[&Value]) -> Map<String, Value> {
    let mut results = Map::new();

    for (name, func) in spec.evaluation_order() {
        let value = match func {
            AggregateFunc::Count(CountTarget::Rows) => Value::from(records.len() as u64),
            AggregateFunc::Count(CountTarget::Field(path)) => Value::from(
                records
                    .iter()
                    .filter(|r| path.resolve(r).is_some_and(|v| !v.is_null()))
                    .count() as u64,
            ),
            AggregateFunc::Sum(path) => number_value(numbers(records, path).iter().sum()),
            AggregateFunc::Avg(path) => {
                let values = numbers(records, path);
                if values.is_empty() {
                    Value::Null
                } else {
                    number_value(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregateFunc::Min(path) => numbers(records, path)
                .into_iter()
                .reduce(f64::min)
                .map_or(Value::Null, number_value),
            AggregateFunc::Max(path) => numbers(records, path)
                .into_iter()
                .reduce(f64::max)
                .map_or(Value::Null, number_value),
            AggregateFunc::First(path) => field_value(records.first(), path),
            AggregateFunc::Last(path) => field_value(records.last(), path),
            AggregateFunc::Percentile { field, p } => {
                percentile(numbers(records, field), *p).map_or(Value::Null, number_value)
            }
            AggregateFunc::Derived { op, operands } => {
                derive(*op, operands, &results).map_or(Value::Null, number_value)
            }
        };
        results.insert(name.to_string(), value);
    }

    results
}

/// Partition by `group_by` and aggregate each group.
///
/// Groups keep first-appearance order; the missing/null group is always last.
/// Each row holds the group key under the `group_by` path plus the aggregates.
pub fn group_and_aggregate(
    spec: &AggregateSpec,
    group_by: &FieldPath,
    records: &[&Value],
) -> Vec<Map<String, Value>> {
    let mut order: Vec<Value> = Vec::new();
    let mut groups: HashMap<String, Vec<&Value>> = HashMap::new();
    let mut null_group: Vec<&Value> = Vec::new();

    for &record in records {
        match group_by.resolve(record).filter(|v| !v.is_null()) {
            Some(key) => {
                let identity = key.to_string();
                let members = groups.entry(identity).or_insert_with(|| {
                    order.push(key.clone().into_owned());
                    Vec::new()
                });
                members.push(record);
            }
            None => null_group.push(record),
        }
    }

    let mut rows = Vec::with_capacity(order.len() + 1);
    for key in order {
        let members = groups.remove(&key.to_string()).unwrap_or_default();
        rows.push(group_row(spec, group_by, key, &members));
    }
    if !null_group.is_empty() {
        rows.push(group_row(
            spec,
            group_by,
            Value::String(NO_VALUE_GROUP.to_string()),
            &null_group,
        ));
    }
    rows
}

fn group_row(spec: &AggregateSpec, group_by: &FieldPath, key: Value, members: &[&Value]) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert(group_by.as_str().to_string(), key);
    row.extend(compute_aggregates(spec, members));
    row
}

/// Keep the rows that satisfy `having`.
///
/// The group key is stored flat under the raw `groupBy` text, so a dotted
/// key is also exposed at its nested position while the row is evaluated.
pub fn apply_having(
    rows: Vec<Map<String, Value>>,
    having: &WhereClause,
    evaluator: &Evaluator<'_>,
) -> Vec<Map<String, Value>> {
    rows.into_iter()
        .filter(|row| evaluator.matches(having, &having_view(row)))
        .collect()
}

fn having_view(row: &Map<String, Value>) -> Value {
    let mut view = row.clone();
    for (key, value) in row {
        if let Ok(path) = FieldPath::parse(key) {
            if path.segments.len() > 1 {
                path.insert_into(&mut view, value.clone());
            }
        }
    }
    Value::Object(view)
}

/// Read `path` from a group row: the flat group key first, then a normal resolve
pub fn row_value<'a>(row: &'a Value, path: &FieldPath) -> Option<Cow<'a, Value>> {
    match row.get(path.as_str()) {
        Some(value) => Some(Cow::Borrowed(value)),
        None => path.resolve(row),
    }
}

fn numbers(records: &[&Value], path: &FieldPath) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| path.resolve(r).and_then(|v| v.as_f64()))
        .collect()
}

fn field_value(record: Option<&&Value>, path: &FieldPath) -> Value {
    record
        .and_then(|r| path.resolve(r))
        .map(|v| v.into_owned())
        .unwrap_or(Value::Null)
}

/// Nearest-rank percentile over unsorted values
fn percentile(mut values: Vec<f64>, p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    values.get(rank.clamp(1, n) - 1).copied()
}

/// Left fold over the operands. A null operand or a zero divisor yields `None`.
fn derive(op: DerivedOp, operands: &[Operand], results: &Map<String, Value>) -> Option<f64> {
    let mut values = operands.iter().map(|operand| match operand {
        Operand::Ref(name) => results.get(name).and_then(Value::as_f64),
        Operand::Literal(n) => Some(*n),
    });

    let first = values.next()??;
    values.try_fold(first, |acc, next| {
        let next = next?;
        match op {
            DerivedOp::Add => Some(acc + next),
            DerivedOp::Subtract => Some(acc - next),
            DerivedOp::Multiply => Some(acc * next),
            DerivedOp::Divide if next == 0.0 => None,
            DerivedOp::Divide => Some(acc / next),
        }
    })
}

/// Integral results render as JSON integers
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
