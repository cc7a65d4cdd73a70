//! Execution Planner
//!
//! Compiles a validated [`Query`] into an ordered list of [`Step`]s, each with
//! an estimated API-call and record count. Dry-run returns this list as is;
//! live execution walks the same list.
//!
//! Step order:
//!
//! ```text
//! FETCH -> [INCLUDE for filtering]* -> [FILTER] -> [INCLUDE]* -> [AGGREGATE] -> [ORDER] -> [LIMIT]
//! ```
//!
//! Cost model:
//!
//! - FETCH: `max(1, ceil(records / page_size))` calls
//! - INCLUDE: one call per parent record (N+1), with a warning
//! - FILTER: free, except one call per record for every `exists` node
//! - AGGREGATE, ORDER, LIMIT: free

use super::ast::{Query, SortDirection, WhereClause};
use super::pushdown::{classify, Pushdown};
use super::schema::{field_selector, filter_relationships, parent_ids, Relationship};
use crate::config::EngineConfig;
use crate::source::{FieldSelector, ServerFilter};
use serde::Serialize;
use serde_json::Value;

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Fetch,
    Include,
    Filter,
    Aggregate,
    Order,
    Limit,
}

/// One planned step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_id: usize,
    pub kind: StepKind,
    pub description: String,
    pub estimated_api_calls: u64,
    pub estimated_records: u64,
    pub warnings: Vec<String>,
    /// Relationship fetched by an INCLUDE step
    #[serde(skip)]
    pub relationship: Option<&'static Relationship>,
    /// INCLUDE scheduled only so FILTER can see the collection; stripped afterwards
    #[serde(skip)]
    pub for_filter: bool,
}

/// Totals reported by dry-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub api_calls: u64,
    pub records: u64,
}

/// The compiled form of a query
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
    pub server_filter: Option<ServerFilter>,
    pub client_filter: Option<WhereClause>,
    pub field_selector: FieldSelector,
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// Sum of step calls, and the record estimate of the last step
    pub fn estimated(&self) -> Estimate {
        Estimate {
            api_calls: self.steps.iter().map(|s| s.estimated_api_calls).sum(),
            records: self.steps.last().map_or(0, |s| s.estimated_records),
        }
    }

    pub fn to_dry_run(&self) -> DryRunOutput {
        DryRunOutput {
            steps: self.steps.clone(),
            estimated: self.estimated(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Dry-run response body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunOutput {
    pub steps: Vec<Step>,
    pub estimated: Estimate,
    pub warnings: Vec<String>,
}

/// Builds plans. Pure: sizing input is passed in, never fetched.
#[derive(Debug, Clone)]
pub struct Planner {
    max_records: u64,
    page_size: u64,
    default_estimated_records: u64,
}

impl Planner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_records: config.max_records as u64,
            page_size: config.page_size.max(1) as u64,
            default_estimated_records: config.default_estimated_records,
        }
    }

    /// Plan `query`. `record_count` is the adapter's count for the entity, if known.
    pub fn plan(&self, query: &Query, record_count: Option<u64>, parse_warnings: &[String]) -> ExecutionPlan {
        let Pushdown { server, client } = classify(query.where_clause.as_ref());
        let mut steps: Vec<Step> = Vec::new();

        // FETCH
        let mut fetch_warnings = Vec::new();
        let available = record_count.unwrap_or_else(|| {
            fetch_warnings.push(format!(
                "Record count for {} is unknown, estimating {} records",
                query.from, self.default_estimated_records
            ));
            self.default_estimated_records
        });
        if available > self.max_records {
            fetch_warnings.push(format!(
                "About {} {} records exceed the cap of {}, results will be truncated",
                available, query.from, self.max_records
            ));
        }
        let mut records = available.min(self.max_records);
        let streams_to_limit =
            client.is_none() && !query.has_ordering() && query.aggregate.is_none();
        if streams_to_limit {
            if let Some(limit) = query.limit {
                records = records.min(limit as u64);
            }
        }
        let mut description = match &server {
            Some(filter) => format!("Fetch {} where {}", query.from, filter.describe()),
            None => format!("Fetch all {}", query.from),
        };
        // One listing per parent container
        let parents = query
            .from
            .parent_filter()
            .map(|field| (field, parent_ids(query.where_clause.as_ref(), field)))
            .unwrap_or_default();
        if !parents.1.is_empty() {
            let ids: Vec<String> = parents.1.iter().map(Value::to_string).collect();
            description.push_str(&format!(" in {} {}", parents.0, ids.join(", ")));
        }
        steps.push(self.step(
            StepKind::Fetch,
            description,
            records
                .div_ceil(self.page_size)
                .max(parents.1.len() as u64)
                .max(1),
            records,
            fetch_warnings,
        ));

        // INCLUDE needed by quantifiers and _count paths
        let filter_includes = client
            .as_ref()
            .map(|clause| filter_relationships(query.from, clause))
            .unwrap_or_default();
        for relationship in &filter_includes {
            let kept = query.includes().iter().any(|name| name == relationship.name);
            let mut step = self.include_step(query, relationship, records);
            step.for_filter = !kept;
            steps.push(step);
        }

        // FILTER
        if let Some(clause) = &client {
            let mut warnings = Vec::new();
            let mut calls = 0;
            for exists in clause.exists_nodes() {
                calls += records;
                warnings.push(format!(
                    "exists on {} issues one API call per {} record (~{} calls)",
                    exists.from, query.from, records
                ));
            }
            steps.push(self.step(
                StepKind::Filter,
                format!("Filter client-side: {}", describe_clause(clause)),
                calls,
                records,
                warnings,
            ));
        }

        // INCLUDE requested for output
        for name in query.includes() {
            if filter_includes.iter().any(|r| r.name == name) {
                continue;
            }
            if let Some(relationship) = query.from.relationship(name) {
                let step = self.include_step(query, relationship, records);
                steps.push(step);
            }
        }

        // AGGREGATE
        if let Some(aggregate) = &query.aggregate {
            let names: Vec<&str> = aggregate.names().collect();
            let mut description = format!("Aggregate {}", names.join(", "));
            if let Some(group_by) = &query.group_by {
                description.push_str(&format!(" grouped by {}", group_by));
            } else {
                records = 1;
            }
            if let Some(having) = &query.having {
                description.push_str(&format!(" having {}", describe_clause(having)));
            }
            steps.push(self.step(StepKind::Aggregate, description, 0, records, Vec::new()));
        }

        // ORDER
        if let Some(order_by) = query.order_by.as_ref().filter(|o| !o.is_empty()) {
            let keys: Vec<String> = order_by
                .iter()
                .map(|o| {
                    let direction = match o.direction {
                        SortDirection::Asc => "asc",
                        SortDirection::Desc => "desc",
                    };
                    format!("{} {}", o.field, direction)
                })
                .collect();
            steps.push(self.step(
                StepKind::Order,
                format!("Order by {}", keys.join(", ")),
                0,
                records,
                Vec::new(),
            ));
        }

        // LIMIT
        if let Some(limit) = query.limit {
            records = records.min(limit as u64);
            steps.push(self.step(
                StepKind::Limit,
                format!("Limit to {} records", limit),
                0,
                records,
                Vec::new(),
            ));
        }

        for (index, step) in steps.iter_mut().enumerate() {
            step.step_id = index + 1;
        }

        let mut warnings: Vec<String> = parse_warnings.to_vec();
        warnings.extend(steps.iter().flat_map(|s| s.warnings.iter().cloned()));

        ExecutionPlan {
            steps,
            server_filter: server,
            client_filter: client,
            field_selector: field_selector(query),
            warnings,
        }
    }

    fn step(
        &self,
        kind: StepKind,
        description: String,
        calls: u64,
        records: u64,
        warnings: Vec<String>,
    ) -> Step {
        Step {
            step_id: 0,
            kind,
            description,
            estimated_api_calls: calls,
            estimated_records: records,
            warnings,
            relationship: None,
            for_filter: false,
        }
    }

    fn include_step(&self, query: &Query, relationship: &'static Relationship, parents: u64) -> Step {
        let warning = format!(
            "Including {} makes one API call per {} record (~{} calls)",
            relationship.name, query.from, parents
        );
        let mut step = self.step(
            StepKind::Include,
            format!(
                "Include {} ({} by {}) for each {} record",
                relationship.name, relationship.target, relationship.reference_field, query.from
            ),
            parents,
            parents,
            vec![warning],
        );
        step.relationship = Some(relationship);
        step
    }
}

/// Compact one-line rendering of a where clause
pub fn describe_clause(clause: &WhereClause) -> String {
    match clause {
        WhereClause::Condition(c) => match (&c.reference, c.op.requires_value()) {
            (Some(reference), _) => format!("{} {} $ref({})", c.path, c.op, reference),
            (None, true) => format!("{} {} {}", c.path, c.op, c.value),
            (None, false) => format!("{} {}", c.path, c.op),
        },
        WhereClause::And(clauses) => join(clauses, " AND "),
        WhereClause::Or(clauses) => join(clauses, " OR "),
        WhereClause::Not(inner) => format!("NOT ({})", describe_clause(inner)),
        WhereClause::All(q) => format!("all {} ({})", q.over, describe_clause(&q.condition)),
        WhereClause::NoneOf(q) => format!("none {} ({})", q.over, describe_clause(&q.condition)),
        WhereClause::Exists(e) => match &e.condition {
            Some(condition) => format!("exists {} ({})", e.from, describe_clause(condition)),
            None => format!("exists {}", e.from),
        },
        WhereClause::MatchAll => "true".to_string(),
    }
}

fn join(clauses: &[WhereClause], separator: &str) -> String {
    let parts: Vec<String> = clauses
        .iter()
        .map(|c| match c {
            WhereClause::And(_) | WhereClause::Or(_) => format!("({})", describe_clause(c)),
            _ => describe_clause(c),
        })
        .collect();
    parts.join(separator)
}
