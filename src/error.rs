//! Error types for the database kernel.
//!
//! All fallible operations return [`DbResult`]. Construction-time failures
//! (bad arguments, no connection, statement creation) and execution failures
//! are kept apart so callers can decide which ones collapse to a sentinel.

use std::error::Error as StdError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("No connection: {context}")]
    NoConnection { context: String },

    #[error("Statement prepare failed: {message} (sql: {sql})")]
    StatementPrepareFailed { sql: String, message: String },

    #[error("Unsupported parameter type at index {index}: {type_name}")]
    UnsupportedParameterType { index: usize, type_name: String },

    #[error("Transaction not found: {name}")]
    TransactionNotFound { name: String },

    #[error("Database unavailable: {message}")]
    DatabaseUnavailable { message: String, suggestion: String },

    #[error("Execution failed: {message}")]
    ExecutionFailed {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Statement is closed: {operation} not permitted")]
    StatementClosed { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a no-connection error.
    pub fn no_connection(context: impl Into<String>) -> Self {
        Self::NoConnection {
            context: context.into(),
        }
    }

    /// Create a statement prepare error.
    pub fn prepare_failed(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatementPrepareFailed {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported parameter error for a 1-based index.
    pub fn unsupported_parameter(index: usize, type_name: impl Into<String>) -> Self {
        Self::UnsupportedParameterType {
            index,
            type_name: type_name.into(),
        }
    }

    /// Create a transaction not found error.
    pub fn transaction_not_found(name: impl Into<String>) -> Self {
        Self::TransactionNotFound { name: name.into() }
    }

    /// Create a database unavailable error with a helpful suggestion.
    pub fn unavailable(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::DatabaseUnavailable {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a closed-statement contract violation.
    pub fn statement_closed(operation: impl Into<String>) -> Self {
        Self::StatementClosed {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::DatabaseUnavailable { suggestion, .. } => Some(suggestion),
            Self::StatementClosed { .. } => Some("Create a new statement"),
            Self::TransactionNotFound { .. } => {
                Some("Register the transaction with get(name, true) first")
            }
            _ => None,
        }
    }

    /// SQLSTATE of the underlying database error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseUnavailable { .. } | Self::Timeout { .. } | Self::NoConnection { .. }
        )
    }
}

/// Walk the `source()` chain down to the innermost error.
pub fn innermost_error<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::Configuration(source) => DbError::unavailable(
                innermost_error(source.as_ref()).to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::unavailable("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => {
                let message = innermost_error(&io_err).to_string();
                DbError::unavailable(
                    format!("I/O error: {}", message),
                    "Check network connectivity and database server status",
                )
            }
            sqlx::Error::Tls(tls_err) => DbError::unavailable(
                format!("TLS error: {}", innermost_error(tls_err.as_ref())),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::execution(format!("Protocol error: {}", msg), None),
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::execution(
                format!("Column index {} out of bounds (len: {})", index, len),
                None,
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::execution(
                format!(
                    "Failed to decode column {}: {}",
                    index,
                    innermost_error(source.as_ref())
                ),
                None,
            ),
            sqlx::Error::Decode(source) => DbError::execution(
                format!("Decode error: {}", innermost_error(source.as_ref())),
                None,
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::internal(format!("Unknown database error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Layer {
        message: &'static str,
        source: Option<Box<Layer>>,
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn test_error_display() {
        let err = DbError::invalid_argument("No Transaction Name");
        assert!(err.to_string().contains("Invalid argument"));
        assert!(err.to_string().contains("No Transaction Name"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::unavailable("refused", "Check the server");
        assert_eq!(err.suggestion(), Some("Check the server"));
        assert!(DbError::execution("x", None).suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::unavailable("err", "sugg").is_retryable());
        assert!(!DbError::unsupported_parameter(1, "f64").is_retryable());
    }

    #[test]
    fn test_sql_state() {
        let err = DbError::execution("syntax error", Some("42601".to_string()));
        assert_eq!(err.sql_state(), Some("42601"));
        assert_eq!(DbError::internal("x").sql_state(), None);
    }

    #[test]
    fn test_innermost_error_walks_chain() {
        let err = Layer {
            message: "outer",
            source: Some(Box::new(Layer {
                message: "middle",
                source: Some(Box::new(Layer {
                    message: "deepest",
                    source: None,
                })),
            })),
        };
        assert_eq!(innermost_error(&err).to_string(), "deepest");
    }

    #[test]
    fn test_innermost_error_without_source_is_self() {
        let err = Layer {
            message: "only",
            source: None,
        };
        assert_eq!(innermost_error(&err).to_string(), "only");
    }

    #[test]
    fn test_from_sqlx_pool_timeout() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Timeout { .. }));
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::ExecutionFailed { .. }));
    }
}
