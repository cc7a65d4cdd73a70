//! # RecordQL
//!
//! A structured query engine for a paginated CRM-style entity API. Queries
//! are JSON documents; the engine validates them, plans the API calls they
//! need and executes them with client-side filtering and aggregation.
//!
//! ## Features
//!
//! - **Strict validation**: parse and validation errors name the offending field
//! - **Cost-aware planning**: dry-run reports estimated API calls per step
//! - **Bounded execution**: record cap, timeout and concurrency limits
//! - **Resumable results**: cursors bound to the query that produced them
//!
//! ## Modules
//!
//! - [`query`]: Query language, planner and executor
//! - [`source`]: Data source seam and the in-memory adapter
//! - [`config`]: Engine and logging configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recordql::query::{ExecutionMode, QueryExecutor};
//! use recordql::source::MemorySource;
//! use recordql::config::EngineConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fixture = serde_json::json!({"persons": [{"id": 1, "name": "Alice"}]});
//!     let source = Arc::new(MemorySource::from_fixture(&fixture)?);
//!     let executor = QueryExecutor::new(source, EngineConfig::default())?;
//!
//!     let output = executor
//!         .run_str(r#"{"from": "persons", "limit": 10}"#, ExecutionMode::Live)
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&output)?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod query;
pub mod source;

pub use config::{Config, ConfigError, ConfigOrigin, EngineConfig, IncludeFailureMode, LoggingConfig};

pub use query::{
    EngineOutput, EntityKind, ExecutionMode, ProgressCallback, Query, QueryError, QueryExecutor,
    QueryOutput, QueryResult,
};

pub use source::{DataSource, FetchRequest, MemorySource, Page, SourceError};
