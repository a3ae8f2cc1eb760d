//! Data models shared by the database layer.

pub mod connection;
pub mod param;
pub mod rowset;
pub mod statement;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType, IsolationLevel};
pub use param::{Clob, SqlParam};
pub use rowset::{ColumnMetadata, RowSet};
pub use statement::{ResultSetConcurrency, ResultSetType, StatementDescriptor};
