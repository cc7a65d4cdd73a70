//! RecordQL Query Engine
//!
//! Structured JSON queries over a paginated entity API:
//!
//! - **AST / Parser**: validate a query document into a typed [`Query`]
//! - **Planner**: cost the query as FETCH / INCLUDE / FILTER / AGGREGATE / ORDER / LIMIT steps
//! - **Executor**: run the plan against a [`DataSource`](crate::source::DataSource)
//!
//! # Query Language
//!
//! ```json
//! {
//!   "$version": "1.0",
//!   "from": "persons",
//!   "select": ["id", "name", "fields.Status"],
//!   "where": {"and": [
//!     {"path": "fields.Status", "op": "eq", "value": "Active"},
//!     {"path": "lastContacted", "op": "gte", "value": "-30d"}
//!   ]},
//!   "include": ["companies"],
//!   "orderBy": [{"field": "name", "direction": "asc"}],
//!   "limit": 50
//! }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use recordql::query::{ExecutionMode, QueryExecutor};
//!
//! let executor = QueryExecutor::new(source, config.engine)?;
//! let output = executor.run_str(r#"{"from": "persons", "limit": 10}"#, ExecutionMode::Live).await?;
//! ```

pub mod aggregate;
pub mod ast;
pub mod cursor;
pub mod dates;
pub mod error;
pub mod executor;
pub mod filter;
pub mod parser;
pub mod path;
pub mod planner;
pub mod progress;
pub mod pushdown;
pub mod result;
pub mod schema;

pub use ast::{
    AggregateFunc, AggregateSpec, Condition, FieldPath, Operator, OrderBy, PathSegment, Query,
    SortDirection, WhereClause,
};
pub use error::{QueryError, QueryResult};
pub use executor::{EngineOutput, ExecutionMode, QueryExecutor};
pub use parser::{parse_query, parse_query_str, ParseResult};
pub use planner::{DryRunOutput, ExecutionPlan, Planner, Step, StepKind};
pub use progress::{NullProgress, ProgressCallback};
pub use result::{MemberFailure, Pagination, QueryOutput, ResultMeta};
pub use schema::{EntityKind, Relationship};
