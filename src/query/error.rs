//! Query error types
//!
//! Provides structured error handling for all query operations including
//! parsing, planning, and execution phases. Every error carries a kind that
//! maps deterministically onto an HTTP status code for the API layer.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Line/column of the offending token, for syntax errors
    pub position: Option<(u32, u32)>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
        }
    }

    /// Create a syntax error anchored at a line/column
    pub fn syntax(message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            kind: QueryErrorKind::Syntax,
            message: message.into(),
            position: Some((line, col)),
        }
    }

    /// Create a dependency cycle error
    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cycle, message)
    }

    /// Create a mapping-not-found error
    pub fn mapping_not_found(resource: &str) -> Self {
        Self::new(
            QueryErrorKind::MappingNotFound,
            format!("no mapping found for resource `{resource}`"),
        )
    }

    /// Create a missing path parameter error
    pub fn missing_path_param(resource: &str, param: &str) -> Self {
        Self::new(
            QueryErrorKind::MissingPathParam,
            format!("resource `{resource}` requires path parameter `{param}`"),
        )
    }

    /// Create a multiplex shape error
    pub fn multiplex_shape(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::MultiplexShape, message)
    }

    /// Create a dependency resolution error
    pub fn dependency_unresolved(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::DependencyUnresolved, message)
    }

    /// Create a saved-query-not-found error
    pub fn query_not_found(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::QueryNotFound, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// HTTP status code this error surfaces as
    pub fn status_code(&self) -> u16 {
        match self.kind {
            QueryErrorKind::Syntax => 400,
            QueryErrorKind::Cycle => 400,
            QueryErrorKind::MappingNotFound => 404,
            QueryErrorKind::MissingPathParam => 400,
            QueryErrorKind::MultiplexShape => 400,
            QueryErrorKind::DependencyUnresolved => 400,
            QueryErrorKind::QueryNotFound => 404,
            QueryErrorKind::Cancelled => 499,
            QueryErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some((line, col)) => {
                write!(
                    f,
                    "{}: {} (line {}, col {})",
                    self.kind, self.message, line, col
                )
            }
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for QueryError {}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Query text violates the grammar
    Syntax,
    /// Statement dependency graph contains a cycle
    Cycle,
    /// No mapping exists for a referenced resource
    MappingNotFound,
    /// A `:param` placeholder in the mapping URL could not be filled
    MissingPathParam,
    /// Multiplexed list parameters disagree in length
    MultiplexShape,
    /// A statement references a dependency that failed or was discarded
    DependencyUnresolved,
    /// Saved query does not exist under the given coordinates
    QueryNotFound,
    /// Query execution was cancelled or hit the request-wide deadline
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::Syntax => write!(f, "SyntaxError"),
            QueryErrorKind::Cycle => write!(f, "CycleError"),
            QueryErrorKind::MappingNotFound => write!(f, "MappingNotFound"),
            QueryErrorKind::MissingPathParam => write!(f, "MissingPathParamError"),
            QueryErrorKind::MultiplexShape => write!(f, "MultiplexShapeError"),
            QueryErrorKind::DependencyUnresolved => write!(f, "DependencyUnresolved"),
            QueryErrorKind::QueryNotFound => write!(f, "QueryNotFound"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;
