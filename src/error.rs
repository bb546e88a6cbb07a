//! Error types for the Cargo query compiler.

use thiserror::Error;

/// The main error type for compiling and running Cargo queries.
#[derive(Debug, Error)]
pub enum CargoError {
    /// A forbidden keyword, token or SQL function was found in a clause.
    #[error("Security error: {0}")]
    Security(String),

    /// Malformed operator usage, quoting or join term.
    #[error("Query syntax error: {0}")]
    Syntax(String),

    /// The tables and joins do not form a valid query shape.
    #[error("Query structure error: {0}")]
    Structure(String),

    /// Unknown table, alias or field.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Driver failure while executing the compiled query.
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CargoError {
    /// Create a security error.
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    /// Create a query syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    /// Create a query structure error.
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure(message.into())
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }
}

impl From<sqlx::Error> for CargoError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Result type alias for Cargo query operations.
pub type CargoResult<T> = Result<T, CargoError>;
