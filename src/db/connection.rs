//! Connection abstraction consumed by the transaction registry and statements.
//!
//! [`ConnectionProvider`] hands out [`DbConnection`]s; [`SqlxConnection`] is
//! the implementation backed by one checked-out sqlx pool connection.
//! JDBC-style autocommit is emulated: with autocommit off, the first
//! statement opens a transaction and `commit`/`rollback` end it.

use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param, check_all_bindable};
use crate::db::types::{RowToValues, to_row_set};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, DatabaseType, IsolationLevel, RowSet, SqlParam};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Connection, Executor, MySql, Postgres, Sqlite, Statement as _, TypeInfo};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Source of fresh connections.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Backend served by this provider.
    fn db_type(&self) -> DatabaseType;

    /// Check out a connection configured with the given autocommit mode and
    /// isolation level. Blocks up to the provider's acquire timeout.
    async fn acquire(
        &self,
        auto_commit: bool,
        isolation: IsolationLevel,
    ) -> DbResult<Box<dyn DbConnection>>;
}

/// One live database connection.
///
/// Implementations are used by a single unit of work at a time; sharing goes
/// through [`SharedConnection`].
#[async_trait]
pub trait DbConnection: Send {
    fn db_type(&self) -> DatabaseType;

    fn is_closed(&self) -> bool;

    fn auto_commit(&self) -> bool;

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()>;

    fn transaction_isolation(&self) -> IsolationLevel;

    async fn set_transaction_isolation(&mut self, level: IsolationLevel) -> DbResult<()>;

    /// Ask the server to compile `sql` without running it.
    async fn prepare(&mut self, sql: &str) -> DbResult<()>;

    /// Run a statement and return the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<u64>;

    /// Run a query and buffer up to `max_rows` rows.
    async fn fetch(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        max_rows: Option<usize>,
    ) -> DbResult<RowSet>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Round-trip to the server.
    async fn ping(&mut self) -> DbResult<()>;

    /// Release the connection. Closing twice is a no-op.
    async fn close(&mut self) -> DbResult<()>;
}

/// A connection that several owners may hold, e.g. a transaction handle and
/// the statements borrowing its connection.
#[derive(Clone)]
pub struct SharedConnection(Arc<Mutex<Box<dyn DbConnection>>>);

impl SharedConnection {
    pub fn new(connection: Box<dyn DbConnection>) -> Self {
        Self(Arc::new(Mutex::new(connection)))
    }

    /// Exclusive access for the duration of one call.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn DbConnection>> {
        self.0.lock().await
    }

    /// Whether both handles point at the same connection.
    pub fn ptr_eq(&self, other: &SharedConnection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Close and swallow failures, for cleanup paths.
    pub(crate) async fn close_quietly(&self) {
        if let Err(e) = self.lock().await.close().await {
            debug!(error = %e, "Ignoring connection close failure");
        }
    }
}

impl std::fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("strong_count", &Arc::strong_count(&self.0))
            .finish_non_exhaustive()
    }
}

/// A checked-out sqlx connection, one variant per backend.
pub enum PooledConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl PooledConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::MySql(_) => DatabaseType::MySQL,
            Self::Postgres(_) => DatabaseType::PostgreSQL,
            Self::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// [`DbConnection`] over a pooled sqlx connection.
pub struct SqlxConnection {
    conn: Option<PooledConnection>,
    db_type: DatabaseType,
    auto_commit: bool,
    isolation: IsolationLevel,
    in_transaction: bool,
}

impl SqlxConnection {
    /// Wrap a checked-out connection. Starts in autocommit mode.
    pub fn new(conn: PooledConnection) -> Self {
        Self {
            db_type: conn.db_type(),
            conn: Some(conn),
            auto_commit: true,
            isolation: IsolationLevel::default(),
            in_transaction: false,
        }
    }

    fn live(&mut self) -> DbResult<&mut PooledConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::no_connection("connection is closed"))
    }

    async fn run_control(&mut self, sql: &str) -> DbResult<()> {
        let conn = self.live()?;
        impl_conn_dispatch!(conn, c => (&mut **c).execute(sql).await.map(|_| ()))?;
        Ok(())
    }

    async fn begin_if_needed(&mut self) -> DbResult<()> {
        if self.auto_commit || self.in_transaction {
            return Ok(());
        }
        let begin = match self.db_type {
            DatabaseType::MySQL => "START TRANSACTION",
            DatabaseType::PostgreSQL | DatabaseType::SQLite => "BEGIN",
        };
        self.run_control(begin).await?;
        self.in_transaction = true;
        debug!(db_type = %self.db_type, "Transaction opened");
        Ok(())
    }

    async fn end_transaction(&mut self, statement: &str) -> DbResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        // Cleared first: a failed COMMIT leaves nothing we could retry
        self.in_transaction = false;
        self.run_control(statement).await
    }
}

/// Columns a statement would return, empty for statements without a result.
async fn describe_columns(conn: &mut PooledConnection, sql: &str) -> DbResult<Vec<ColumnMetadata>> {
    let columns = impl_conn_dispatch!(conn, c => (&mut **c).prepare(sql).await.map(|stmt| {
        stmt.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
            .collect::<Vec<_>>()
    }))?;
    Ok(columns)
}

fn truncate_rows<R: RowToValues>(mut rows: Vec<R>, max_rows: Option<usize>) -> RowSet {
    let truncated = max_rows.is_some_and(|max| rows.len() > max);
    if let Some(max) = max_rows {
        rows.truncate(max);
    }
    to_row_set(&rows, truncated)
}

#[async_trait]
impl DbConnection for SqlxConnection {
    fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.live()?;
        if auto_commit && self.in_transaction {
            // Switching autocommit back on commits pending work
            self.end_transaction("COMMIT").await?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn transaction_isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn set_transaction_isolation(&mut self, level: IsolationLevel) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::invalid_argument(
                "cannot change isolation level inside an open transaction",
            ));
        }
        match self.db_type {
            DatabaseType::MySQL => {
                let sql = format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.as_sql());
                self.run_control(&sql).await?;
            }
            DatabaseType::PostgreSQL => {
                let sql = format!(
                    "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                    level.as_sql()
                );
                self.run_control(&sql).await?;
            }
            DatabaseType::SQLite => {
                // SQLite transactions are always serializable
                self.live()?;
                debug!(level = %level, "Isolation level recorded only for SQLite");
            }
        }
        self.isolation = level;
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> DbResult<()> {
        let conn = self.live()?;
        impl_conn_dispatch!(conn, c => (&mut **c).prepare(sql).await.map(|_| ()))
            .map_err(|e| DbError::prepare_failed(sql, DbError::from(e).to_string()))
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        check_all_bindable(params)?;
        self.begin_if_needed().await?;
        let conn = self.live()?;

        let rows_affected = match conn {
            PooledConnection::MySql(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query.execute(&mut **c).await?.rows_affected()
            }
            PooledConnection::Postgres(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.execute(&mut **c).await?.rows_affected()
            }
            PooledConnection::SQLite(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.execute(&mut **c).await?.rows_affected()
            }
        };

        debug!(sql = %sql, rows_affected = rows_affected, "Statement executed");
        Ok(rows_affected)
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        max_rows: Option<usize>,
    ) -> DbResult<RowSet> {
        check_all_bindable(params)?;
        self.begin_if_needed().await?;
        let conn = self.live()?;
        // One extra row tells us whether the limit cut anything off
        let limit = max_rows.map_or(usize::MAX, |max| max.saturating_add(1));

        let row_set = match conn {
            PooledConnection::MySql(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                let rows: Vec<sqlx::mysql::MySqlRow> =
                    query.fetch(&mut **c).take(limit).try_collect().await?;
                truncate_rows(rows, max_rows)
            }
            PooledConnection::Postgres(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                let rows: Vec<sqlx::postgres::PgRow> =
                    query.fetch(&mut **c).take(limit).try_collect().await?;
                truncate_rows(rows, max_rows)
            }
            PooledConnection::SQLite(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                let rows: Vec<sqlx::sqlite::SqliteRow> =
                    query.fetch(&mut **c).take(limit).try_collect().await?;
                truncate_rows(rows, max_rows)
            }
        };

        // No rows means no column metadata; ask the prepared statement instead
        let row_set = if row_set.columns().is_empty() {
            RowSet::new(describe_columns(self.live()?, sql).await?, Vec::new(), false)
        } else {
            row_set
        };

        debug!(sql = %sql, row_count = row_set.len(), "Query buffered");
        Ok(row_set)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.live()?;
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.live()?;
        self.end_transaction("ROLLBACK").await
    }

    async fn ping(&mut self) -> DbResult<()> {
        let conn = self.live()?;
        impl_conn_dispatch!(conn, c => c.ping().await)?;
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        let rollback = self.end_transaction("ROLLBACK").await;
        if let Some(conn) = self.conn.take() {
            match &rollback {
                // Dropping a PoolConnection returns it to the pool
                Ok(()) => drop(conn),
                Err(e) => {
                    warn!(error = %e, "Rollback on close failed; discarding connection");
                    impl_conn_dispatch!(conn, c => drop(c.detach()));
                }
            }
        }
        rollback
    }
}

impl Drop for SqlxConnection {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        // Never hand a connection with an open transaction back to the pool
        if let Some(conn) = self.conn.take() {
            warn!(db_type = %self.db_type, "Connection dropped inside a transaction; discarding it");
            impl_conn_dispatch!(conn, c => drop(c.detach()));
        }
    }
}
