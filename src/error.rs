//! Error types for the engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Query pipeline error
    #[error("query error: {0}")]
    Query(#[from] crate::query::error::QueryError),

    /// Plugin error
    #[error("plugin error: {0}")]
    Plugin(#[from] crate::plugins::PluginError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
