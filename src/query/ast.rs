//! Query Abstract Syntax Tree
//!
//! Typed form of a JSON query document. The filter language is a closed
//! tagged tree ([`WhereClause`]) evaluated by a single dispatch in
//! [`crate::query::filter`].
//!
//! # Example Query
//!
//! ```text
//! { "from": "persons",
//!   "where": { "and": [
//!       { "path": "email", "op": "contains", "value": "@acme.com" },
//!       { "none": { "path": "interactions", "where": { "path": "type", "op": "eq", "value": "meeting" } } }
//!   ] },
//!   "orderBy": [{ "field": "lastName" }],
//!   "limit": 50 }
//! ```

pub use super::path::{FieldPath, PathSegment};
use super::error::{QueryError, QueryResult};
use super::schema::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Query document version assumed when `$version` is absent
pub const CURRENT_VERSION: &str = "1.0";

/// Versions this engine understands
pub const SUPPORTED_VERSIONS: &[&str] = &[CURRENT_VERSION];

/// Hard ceiling for `limit`
pub const MAX_LIMIT: usize = 10_000;

/// A parsed and validated query. Read-only once built.
#[derive(Debug, Clone)]
pub struct Query {
    pub version: String,
    pub from: EntityKind,
    /// Projection, `None` means every field
    pub select: Option<Vec<FieldPath>>,
    pub where_clause: Option<WhereClause>,
    /// Relationship names to attach to each record
    pub include: Option<Vec<String>>,
    pub order_by: Option<Vec<OrderBy>>,
    pub group_by: Option<FieldPath>,
    pub aggregate: Option<AggregateSpec>,
    pub having: Option<WhereClause>,
    pub limit: Option<usize>,
    /// Resume token from a previous run
    pub cursor: Option<String>,
    /// Hash of the query without its cursor, binds cursors to queries
    pub fingerprint: String,
}

impl Query {
    /// Included relationship names (empty when there is no `include`)
    pub fn includes(&self) -> &[String] {
        self.include.as_deref().unwrap_or_default()
    }

    pub fn has_ordering(&self) -> bool {
        self.order_by.as_ref().is_some_and(|o| !o.is_empty())
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: FieldPath,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Boolean filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// Leaf comparison
    Condition(Condition),
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
    Not(Box<WhereClause>),
    /// Every element of a collection matches
    All(Quantifier),
    /// No element of a collection matches
    NoneOf(Quantifier),
    /// A related query returns at least one record
    Exists(ExistsSubquery),
    /// `{}`
    MatchAll,
}

impl WhereClause {
    /// Visit every field path evaluated against the queried record.
    ///
    /// Quantifier bodies and subquery conditions address other records and are
    /// skipped, except for `$ref` paths which point back at the outer record.
    pub fn visit_paths<'a>(&'a self, f: &mut dyn FnMut(&'a FieldPath)) {
        match self {
            Self::Condition(condition) => {
                f(&condition.path);
                if let Some(reference) = &condition.reference {
                    f(reference);
                }
            }
            Self::And(clauses) | Self::Or(clauses) => {
                for clause in clauses {
                    clause.visit_paths(f);
                }
            }
            Self::Not(inner) => inner.visit_paths(f),
            Self::All(quantifier) | Self::NoneOf(quantifier) => f(&quantifier.over),
            Self::Exists(exists) => {
                if let Some(condition) = &exists.condition {
                    condition.visit_references(f);
                }
            }
            Self::MatchAll => {}
        }
    }

    fn visit_references<'a>(&'a self, f: &mut dyn FnMut(&'a FieldPath)) {
        match self {
            Self::Condition(condition) => {
                if let Some(reference) = &condition.reference {
                    f(reference);
                }
            }
            Self::And(clauses) | Self::Or(clauses) => {
                for clause in clauses {
                    clause.visit_references(f);
                }
            }
            Self::Not(inner) => inner.visit_references(f),
            Self::All(q) | Self::NoneOf(q) => q.condition.visit_references(f),
            Self::Exists(_) | Self::MatchAll => {}
        }
    }

    /// Visit the root key of every path that needs a whole collection:
    /// quantifier targets and paths ending in `_count`.
    pub fn visit_collection_roots(&self, f: &mut dyn FnMut(&str)) {
        match self {
            Self::Condition(condition) => {
                if condition.path.has_count() {
                    if let Some(root) = condition.path.root_key() {
                        f(root);
                    }
                }
            }
            Self::And(clauses) | Self::Or(clauses) => {
                for clause in clauses {
                    clause.visit_collection_roots(f);
                }
            }
            Self::Not(inner) => inner.visit_collection_roots(f),
            Self::All(quantifier) | Self::NoneOf(quantifier) => {
                if let Some(root) = quantifier.over.root_key() {
                    f(root);
                }
            }
            Self::Exists(_) | Self::MatchAll => {}
        }
    }

    /// All `exists` nodes in this tree, in document order
    pub fn exists_nodes(&self) -> Vec<&ExistsSubquery> {
        let mut nodes = Vec::new();
        self.collect_exists(&mut nodes);
        nodes
    }

    fn collect_exists<'a>(&'a self, nodes: &mut Vec<&'a ExistsSubquery>) {
        match self {
            Self::Exists(exists) => nodes.push(exists),
            Self::And(clauses) | Self::Or(clauses) => {
                for clause in clauses {
                    clause.collect_exists(nodes);
                }
            }
            Self::Not(inner) => inner.collect_exists(nodes),
            Self::All(q) | Self::NoneOf(q) => q.condition.collect_exists(nodes),
            Self::Condition(_) | Self::MatchAll => {}
        }
    }
}

/// `{path, op, value}`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: FieldPath,
    pub op: Operator,
    /// Literal operand, `Null` for operators that take none
    pub value: Value,
    /// Set for `{"$ref": path}` operands inside a subquery
    pub reference: Option<FieldPath>,
}

/// `{all|none: {over, where}}`
#[derive(Debug, Clone, PartialEq)]
pub struct Quantifier {
    pub over: FieldPath,
    pub condition: Box<WhereClause>,
}

/// `{exists: {from, via?, where?}}`
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsSubquery {
    /// Position in document order, keys precomputed answers
    pub id: usize,
    pub from: EntityKind,
    /// Field on the subquery entity that references the outer record's id
    pub via: Option<String>,
    pub condition: Option<Box<WhereClause>>,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Between,
    ContainsAny,
    ContainsAll,
    HasAny,
    HasAll,
    IsNull,
    IsNotNull,
    IsEmpty,
}

impl Operator {
    pub fn all() -> &'static [Operator] {
        &[
            Self::Eq,
            Self::Neq,
            Self::Gt,
            Self::Gte,
            Self::Lt,
            Self::Lte,
            Self::Contains,
            Self::StartsWith,
            Self::EndsWith,
            Self::In,
            Self::Between,
            Self::ContainsAny,
            Self::ContainsAll,
            Self::HasAny,
            Self::HasAll,
            Self::IsNull,
            Self::IsNotNull,
            Self::IsEmpty,
        ]
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|op| op.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::Between => "between",
            Self::ContainsAny => "contains_any",
            Self::ContainsAll => "contains_all",
            Self::HasAny => "has_any",
            Self::HasAll => "has_all",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::IsEmpty => "is_empty",
        }
    }

    /// Sorted, comma-separated operator names for error messages
    pub fn supported_list() -> String {
        let mut names: Vec<&str> = Self::all().iter().map(|op| op.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }

    /// Whether the condition must carry a `value`
    pub fn requires_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull | Self::IsEmpty)
    }

    /// Whether `value` must be an array
    pub fn requires_array(&self) -> bool {
        matches!(
            self,
            Self::In | Self::Between | Self::ContainsAny | Self::ContainsAll | Self::HasAny | Self::HasAll
        )
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What `count` counts
#[derive(Debug, Clone, PartialEq)]
pub enum CountTarget {
    /// `count: true`, every row
    Rows,
    /// `count: "field"`, rows where the field is non-null
    Field(FieldPath),
}

/// Arithmetic for derived aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl DerivedOp {
    pub fn all() -> &'static [DerivedOp] {
        &[Self::Add, Self::Subtract, Self::Multiply, Self::Divide]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|op| op.as_str() == s)
    }
}

/// Operand of a derived aggregate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Name of another aggregate in the same spec
    Ref(String),
    Literal(f64),
}

/// One aggregate expression
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFunc {
    Count(CountTarget),
    Sum(FieldPath),
    Avg(FieldPath),
    Min(FieldPath),
    Max(FieldPath),
    First(FieldPath),
    Last(FieldPath),
    /// Nearest-rank percentile, `p` in 0..=100
    Percentile { field: FieldPath, p: f64 },
    /// Computed from other aggregates of the same group
    Derived { op: DerivedOp, operands: Vec<Operand> },
}

/// Function names accepted in an aggregate entry
pub const AGGREGATE_FUNCTIONS: &[&str] = &[
    "count",
    "sum",
    "avg",
    "min",
    "max",
    "first",
    "last",
    "percentile",
    "add",
    "subtract",
    "multiply",
    "divide",
];

impl AggregateFunc {
    /// Field read from each record, if any
    pub fn field(&self) -> Option<&FieldPath> {
        match self {
            Self::Count(CountTarget::Field(field))
            | Self::Sum(field)
            | Self::Avg(field)
            | Self::Min(field)
            | Self::Max(field)
            | Self::First(field)
            | Self::Last(field)
            | Self::Percentile { field, .. } => Some(field),
            Self::Count(CountTarget::Rows) | Self::Derived { .. } => None,
        }
    }

    /// Aggregate names this entry depends on
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        let operands: &[Operand] = match self {
            Self::Derived { operands, .. } => operands,
            _ => &[],
        };
        operands.iter().filter_map(|operand| match operand {
            Operand::Ref(name) => Some(name.as_str()),
            Operand::Literal(_) => None,
        })
    }
}

/// Named aggregates with a precomputed evaluation order
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    entries: BTreeMap<String, AggregateFunc>,
    order: Vec<String>,
}

impl AggregateSpec {
    /// Build a spec, rejecting unknown references and cycles between
    /// derived aggregates.
    pub fn new(entries: BTreeMap<String, AggregateFunc>) -> QueryResult<Self> {
        for (name, func) in &entries {
            for dependency in func.dependencies() {
                if !entries.contains_key(dependency) {
                    return Err(QueryError::validation(
                        format!(
                            "Aggregate '{}' references unknown aggregate '{}'. Available aggregates: {}",
                            name,
                            dependency,
                            entries.keys().cloned().collect::<Vec<_>>().join(", ")
                        ),
                        format!("aggregate.{}", name),
                    ));
                }
            }
        }

        // Kahn's algorithm, lowest name first for a stable order
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = entries
            .iter()
            .map(|(name, func)| (name.as_str(), func.dependencies().collect()))
            .collect();
        let mut order = Vec::with_capacity(entries.len());

        while !pending.is_empty() {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();

            if ready.is_empty() {
                let cycle: Vec<&str> = pending.keys().copied().collect();
                return Err(QueryError::validation(
                    format!(
                        "Circular reference between aggregates: {}",
                        cycle.join(", ")
                    ),
                    format!("aggregate.{}", cycle[0]),
                ));
            }

            for name in ready {
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
                order.push(name.to_string());
            }
        }

        Ok(Self { entries, order })
    }

    /// Names in evaluation order, dependencies first
    pub fn evaluation_order(&self) -> impl Iterator<Item = (&str, &AggregateFunc)> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|func| (name.as_str(), func)))
    }

    pub fn get(&self, name: &str) -> Option<&AggregateFunc> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record fields read by the base aggregates
    pub fn field_paths(&self) -> Vec<&FieldPath> {
        self.entries.values().filter_map(AggregateFunc::field).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> FieldPath {
        FieldPath::parse(raw).unwrap()
    }

    fn derived(op: DerivedOp, refs: &[&str]) -> AggregateFunc {
        AggregateFunc::Derived {
            op,
            operands: refs.iter().map(|r| Operand::Ref(r.to_string())).collect(),
        }
    }

    #[test]
    fn test_operator_supported_list_is_sorted() {
        assert_eq!(
            Operator::supported_list(),
            "between, contains, contains_all, contains_any, ends_with, eq, gt, gte, has_all, \
             has_any, in, is_empty, is_not_null, is_null, lt, lte, neq, starts_with"
        );
        assert_eq!(Operator::parse("starts_with"), Some(Operator::StartsWith));
        assert_eq!(Operator::parse("like"), None);
    }

    #[test]
    fn test_aggregate_order_puts_dependencies_first() {
        let mut entries = BTreeMap::new();
        entries.insert("avg_per".to_string(), derived(DerivedOp::Divide, &["total", "n"]));
        entries.insert("total".to_string(), AggregateFunc::Sum(path("amount")));
        entries.insert("n".to_string(), AggregateFunc::Count(CountTarget::Rows));
        entries.insert("scaled".to_string(), derived(DerivedOp::Multiply, &["avg_per", "n"]));

        let spec = AggregateSpec::new(entries).unwrap();
        let order: Vec<&str> = spec.evaluation_order().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["n", "total", "avg_per", "scaled"]);
        assert_eq!(spec.field_paths(), vec![&path("amount")]);
    }

    #[test]
    fn test_aggregate_cycle_rejected() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), derived(DerivedOp::Add, &["b", "b"]));
        entries.insert("b".to_string(), derived(DerivedOp::Add, &["a", "a"]));

        let err = AggregateSpec::new(entries).unwrap_err();
        assert!(matches!(err, QueryError::Validation { .. }));
        assert_eq!(err.field(), Some("aggregate.a"));
    }

    #[test]
    fn test_aggregate_unknown_reference_rejected() {
        let mut entries = BTreeMap::new();
        entries.insert("ratio".to_string(), derived(DerivedOp::Divide, &["won", "total"]));
        entries.insert("total".to_string(), AggregateFunc::Count(CountTarget::Rows));

        let err = AggregateSpec::new(entries).unwrap_err();
        assert_eq!(err.field(), Some("aggregate.ratio"));
        assert!(err.to_string().contains("unknown aggregate 'won'"));
    }

    #[test]
    fn test_exists_nodes_and_collection_roots() {
        let clause = WhereClause::And(vec![
            WhereClause::All(Quantifier {
                over: path("interactions"),
                condition: Box::new(WhereClause::MatchAll),
            }),
            WhereClause::Not(Box::new(WhereClause::Exists(ExistsSubquery {
                id: 0,
                from: EntityKind::Notes,
                via: Some("personIds".to_string()),
                condition: None,
            }))),
        ]);

        assert_eq!(clause.exists_nodes().len(), 1);
        let mut roots = Vec::new();
        clause.visit_collection_roots(&mut |r| roots.push(r.to_string()));
        assert_eq!(roots, vec!["interactions"]);
    }
}
