//! Expression Evaluator
//!
//! Evaluates a [`WhereClause`] against one record. Evaluation is total:
//! incompatible operand types make a comparison `false` instead of failing,
//! so filtering never aborts on heterogeneous records.
//!
//! Null handling is deliberate: `is_null` treats a missing path, JSON `null`
//! and an empty array alike, and `is_empty` adds `""` and `{}`.
//!
//! `exists` is the only branch that needs I/O. The evaluator asks an
//! [`ExistsOracle`], which the executor backs with answers fetched ahead of
//! time under bounded concurrency.

use super::ast::{Condition, ExistsSubquery, Operator, Quantifier, WhereClause};
use super::dates::DateResolver;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Answers `exists` subqueries for a record
pub trait ExistsOracle {
    fn exists(&self, subquery: &ExistsSubquery, record: &Value) -> bool;
}

/// Oracle for contexts without subqueries. Every `exists` is false.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSubqueries;

impl ExistsOracle for NoSubqueries {
    fn exists(&self, _subquery: &ExistsSubquery, _record: &Value) -> bool {
        false
    }
}

/// Precomputed answers for a single record, keyed by subquery id
#[derive(Debug, Default, Clone)]
pub struct ExistsAnswers(pub HashMap<usize, bool>);

impl ExistsOracle for ExistsAnswers {
    fn exists(&self, subquery: &ExistsSubquery, _record: &Value) -> bool {
        self.0.get(&subquery.id).copied().unwrap_or(false)
    }
}

/// Evaluates where clauses
pub struct Evaluator<'a> {
    dates: &'a DateResolver,
    oracle: &'a dyn ExistsOracle,
}

impl<'a> Evaluator<'a> {
    pub fn new(dates: &'a DateResolver) -> Self {
        Self {
            dates,
            oracle: &NoSubqueries,
        }
    }

    /// Builder method: answer `exists` nodes through `oracle`
    pub fn with_oracle(mut self, oracle: &'a dyn ExistsOracle) -> Self {
        self.oracle = oracle;
        self
    }

    /// Whether `record` satisfies `clause`. Compound nodes short-circuit left to right.
    pub fn matches(&self, clause: &WhereClause, record: &Value) -> bool {
        match clause {
            WhereClause::Condition(condition) => self.condition(condition, record),
            WhereClause::And(clauses) => clauses.iter().all(|c| self.matches(c, record)),
            WhereClause::Or(clauses) => clauses.iter().any(|c| self.matches(c, record)),
            WhereClause::Not(inner) => !self.matches(inner, record),
            WhereClause::All(quantifier) => self.quantify(quantifier, record, true),
            WhereClause::NoneOf(quantifier) => self.quantify(quantifier, record, false),
            WhereClause::Exists(subquery) => self.oracle.exists(subquery, record),
            WhereClause::MatchAll => true,
        }
    }

    /// `all` when `every` is set, `none` otherwise. Both hold on an empty
    /// or missing collection; a scalar is a one-element collection.
    fn quantify(&self, quantifier: &Quantifier, record: &Value, every: bool) -> bool {
        let Some(found) = quantifier.over.resolve(record) else {
            return true;
        };
        let test = |element: &Value| self.matches(&quantifier.condition, element);

        match &*found {
            Value::Null => true,
            Value::Array(items) if every => items.iter().all(test),
            Value::Array(items) => !items.iter().any(test),
            single if every => test(single),
            single => !test(single),
        }
    }

    fn condition(&self, condition: &Condition, record: &Value) -> bool {
        let resolved = condition.path.resolve(record);
        let field = resolved.as_deref();
        let target = &condition.value;

        match condition.op {
            Operator::Eq => equals(field, target),
            Operator::Neq => !equals(field, target),
            Operator::Gt => self.compare(field, target) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                self.compare(field, target),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => self.compare(field, target) == Some(Ordering::Less),
            Operator::Lte => matches!(
                self.compare(field, target),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Between => match target.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    matches!(
                        self.compare(field, low),
                        Some(Ordering::Greater | Ordering::Equal)
                    ) && matches!(
                        self.compare(field, high),
                        Some(Ordering::Less | Ordering::Equal)
                    )
                }
                _ => false,
            },
            Operator::Contains => string_test(field, target, |h, n| h.contains(n)),
            Operator::StartsWith => string_test(field, target, |h, n| h.starts_with(n)),
            Operator::EndsWith => string_test(field, target, |h, n| h.ends_with(n)),
            Operator::In => is_in(field, target),
            Operator::ContainsAny => terms_test(field, target, false),
            Operator::ContainsAll => terms_test(field, target, true),
            Operator::HasAny => has_elements(field, target, false),
            Operator::HasAll => has_elements(field, target, true),
            Operator::IsNull => is_null(field),
            Operator::IsNotNull => !is_null(field),
            Operator::IsEmpty => is_empty(field),
        }
    }

    /// Order a record value against a literal. `None` when not comparable.
    fn compare(&self, field: Option<&Value>, target: &Value) -> Option<Ordering> {
        let field = field.filter(|v| !v.is_null())?;

        if let Value::String(token) = target {
            if let Some(instant) = self.dates.resolve(token) {
                return Some(self.dates.instant_of(field)?.cmp(&instant));
            }
        }

        match (field, target) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Replace `$ref` operands with values read from the outer record
pub fn substitute_refs(clause: &WhereClause, outer: &Value) -> WhereClause {
    match clause {
        WhereClause::Condition(condition) => match &condition.reference {
            Some(reference) => WhereClause::Condition(Condition {
                path: condition.path.clone(),
                op: condition.op,
                value: reference
                    .resolve(outer)
                    .map(|v| v.into_owned())
                    .unwrap_or(Value::Null),
                reference: None,
            }),
            None => clause.clone(),
        },
        WhereClause::And(clauses) => {
            WhereClause::And(clauses.iter().map(|c| substitute_refs(c, outer)).collect())
        }
        WhereClause::Or(clauses) => {
            WhereClause::Or(clauses.iter().map(|c| substitute_refs(c, outer)).collect())
        }
        WhereClause::Not(inner) => WhereClause::Not(Box::new(substitute_refs(inner, outer))),
        WhereClause::All(q) => WhereClause::All(Quantifier {
            over: q.over.clone(),
            condition: Box::new(substitute_refs(&q.condition, outer)),
        }),
        WhereClause::NoneOf(q) => WhereClause::NoneOf(Quantifier {
            over: q.over.clone(),
            condition: Box::new(substitute_refs(&q.condition, outer)),
        }),
        WhereClause::Exists(_) | WhereClause::MatchAll => clause.clone(),
    }
}

/// Equality with numeric normalization (`1` equals `1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn equals(field: Option<&Value>, target: &Value) -> bool {
    match (field, target) {
        (None | Some(Value::Null), Value::Null) => true,
        (None | Some(Value::Null), _) => false,
        (Some(Value::Array(items)), t) if !t.is_array() => {
            items.iter().any(|item| values_equal(item, t))
        }
        (Some(value), t) => values_equal(value, t),
    }
}

/// String conversion used by the case-insensitive string operators
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_test(field: Option<&Value>, target: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    let needle = stringify(target).to_lowercase();
    match field {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| test(&stringify(item).to_lowercase(), &needle)),
        Some(value) => test(&stringify(value).to_lowercase(), &needle),
    }
}

fn is_in(field: Option<&Value>, target: &Value) -> bool {
    let Some(list) = target.as_array() else {
        return false;
    };
    match field {
        None | Some(Value::Null) => list.iter().any(Value::is_null),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| list.iter().any(|candidate| values_equal(item, candidate))),
        Some(value) => list.iter().any(|candidate| values_equal(value, candidate)),
    }
}

/// `contains_any` / `contains_all`: substring terms over a string, or
/// case-insensitive membership over an array
fn terms_test(field: Option<&Value>, target: &Value, every: bool) -> bool {
    let Some(terms) = target.as_array() else {
        return false;
    };
    let terms: Vec<String> = terms.iter().map(|t| stringify(t).to_lowercase()).collect();

    let present: Box<dyn Fn(&str) -> bool> = match field {
        Some(Value::String(s)) => {
            let haystack = s.to_lowercase();
            Box::new(move |term: &str| haystack.contains(term))
        }
        Some(Value::Array(items)) => {
            let elements: Vec<String> = items.iter().map(|i| stringify(i).to_lowercase()).collect();
            Box::new(move |term: &str| elements.iter().any(|e| e == term))
        }
        _ => return false,
    };

    if every {
        terms.iter().all(|t| present(t))
    } else {
        terms.iter().any(|t| present(t))
    }
}

/// `has_any` / `has_all`: exact element membership in an array field
fn has_elements(field: Option<&Value>, target: &Value, every: bool) -> bool {
    let (Some(Value::Array(items)), Some(wanted)) = (field, target.as_array()) else {
        return false;
    };
    let present = |w: &Value| items.iter().any(|item| values_equal(item, w));
    if every {
        wanted.iter().all(present)
    } else {
        wanted.iter().any(present)
    }
}

fn is_null(field: Option<&Value>) -> bool {
    match field {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn is_empty(field: Option<&Value>) -> bool {
    match field {
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        other => is_null(other),
    }
}
