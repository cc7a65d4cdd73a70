//! Query error types
//!
//! Three client-facing categories:
//!
//! - **Parse**: malformed JSON or wrong field types, names the bad field
//! - **Validation**: well-formed but forbidden, lists the legal alternatives
//! - **Execution**: a data source failure during FETCH / INCLUDE / `exists`
//!
//! Hitting the record cap or the timeout is not an error. It is reported
//! through `truncated` on the result.

use crate::source::SourceError;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// Query document could not be parsed
    #[error("{message}")]
    Parse {
        message: String,
        field: Option<String>,
    },

    /// Query is well-formed but violates a constraint
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The data source failed while executing
    #[error("{message}")]
    Execution {
        message: String,
        #[source]
        source: Option<SourceError>,
    },
}

impl QueryError {
    pub fn parse(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Parse error that cannot be pinned to a field (invalid JSON)
    pub fn parse_document(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Wrap a data source failure
    pub fn source(context: &str, error: SourceError) -> Self {
        Self::Execution {
            message: format!("{}: {}", context, error),
            source: Some(error),
        }
    }

    /// Offending field, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Parse { field, .. } | Self::Validation { field, .. } => field.as_deref(),
            Self::Execution { .. } => None,
        }
    }

    /// Error type name used in responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "QueryParseError",
            Self::Validation { .. } => "QueryValidationError",
            Self::Execution { .. } => "QueryExecutionError",
        }
    }

    /// Client-facing error object
    pub fn to_response(&self) -> Value {
        let mut error = json!({
            "type": self.kind(),
            "message": self.to_string(),
        });
        if let Some(field) = self.field() {
            error["field"] = json!(field);
        }
        json!({ "error": error })
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
