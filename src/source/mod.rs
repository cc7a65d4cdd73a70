//! Data Source Adapter
//!
//! The query engine never talks HTTP itself. Everything it knows about the
//! remote entity API goes through the [`DataSource`] trait:
//!
//! - **fetch**: one page of records for an entity kind, optionally narrowed by
//!   a server-side filter and resumed from an opaque cursor
//! - **estimate_count**: optional sizing hint used by dry-run planning
//!
//! Authentication, retries and rate-limit back-off are the adapter's job. The
//! engine drains pages until `next_cursor` is absent or a safety limit is hit.
//!
//! [`MemorySource`] is an in-memory adapter backed by fixture records.

mod memory;

pub use memory::MemorySource;

use crate::query::EntityKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Paginated access to a remote entity API
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Fetch a single page
    async fn fetch(&self, request: FetchRequest) -> Result<Page, SourceError>;

    /// Total number of records of a kind, if the source can tell cheaply
    async fn estimate_count(&self, _entity: EntityKind) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }
}

/// Arguments of a single `fetch` call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub entity: EntityKind,
    pub fields: FieldSelector,
    pub filter: Option<ServerFilter>,
    pub page_size: usize,
    pub cursor: Option<String>,
}

impl FetchRequest {
    /// Request the first page of an entity kind
    pub fn new(entity: EntityKind, page_size: usize) -> Self {
        Self {
            entity,
            fields: FieldSelector::All,
            filter: None,
            page_size,
            cursor: None,
        }
    }

    pub fn fields(mut self, fields: FieldSelector) -> Self {
        self.fields = fields;
        self
    }

    pub fn filter(mut self, filter: Option<ServerFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub records: Vec<Value>,
    pub next_cursor: Option<String>,
}

/// Which custom fields the adapter should materialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    /// Built-in properties plus every custom field
    All,
    /// Built-in properties only
    Builtin,
    /// Built-in properties plus the named custom fields
    Custom(Vec<String>),
}

/// Conjunction of predicates the remote API evaluates server-side
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFilter {
    pub predicates: Vec<ServerPredicate>,
}

impl ServerFilter {
    pub fn new(predicates: Vec<ServerPredicate>) -> Self {
        Self { predicates }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Add a predicate, returning the extended filter
    pub fn and(mut self, predicate: ServerPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Human-readable rendering for plan descriptions
    pub fn describe(&self) -> String {
        self.predicates
            .iter()
            .map(ServerPredicate::describe)
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// A single server-side predicate
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPredicate {
    /// Custom field equals a scalar value
    FieldEquals { field: String, value: Value },
    /// Built-in reference field points at the given id (relationship lookup)
    Reference { field: String, value: Value },
}

impl ServerPredicate {
    pub fn describe(&self) -> String {
        match self {
            Self::FieldEquals { field, value } => format!("fields.{} = {}", field, value),
            Self::Reference { field, value } => format!("{} -> {}", field, value),
        }
    }
}

/// Errors surfaced by a data source
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}
