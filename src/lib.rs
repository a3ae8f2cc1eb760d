//! Database kernel library.
//!
//! Named transactions, statement proxies and a small execution facade over
//! SQL databases (SQLite, PostgreSQL, MySQL), plus time-to-live caches with
//! a registry for bulk invalidation.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{Db, TransactionRegistry};
pub use error::{DbError, DbResult};
