//! Database access layer.
//!
//! This module provides:
//! - Connection abstraction and the sqlx-backed pooled provider
//! - Named transaction registry
//! - Statement proxies (plain, prepared, callable)
//! - The `Db` facade for executing SQL
//! - Parameter binding and type mappings
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod connection;
pub mod facade;
pub mod params;
pub mod pool;
pub mod statement;
pub mod transaction_registry;
pub mod types;

pub use connection::{ConnectionProvider, DbConnection, SharedConnection, SqlxConnection};
pub use facade::{Db, SQL_STATEMENT_SEPARATOR, ScriptSummary};
pub use pool::{DbPool, PoolProvider};
pub use statement::{
    CallableStatement, ConnectionSource, PlainStatement, PreparedStatement, Statement,
};
pub use transaction_registry::{TransactionHandle, TransactionMetadata, TransactionRegistry};
