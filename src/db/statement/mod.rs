//! Statement proxies.
//!
//! Three variants share one lifecycle: [`PlainStatement`] takes its SQL per
//! call, [`PreparedStatement`] fixes it at construction and binds positional
//! parameters, [`CallableStatement`] does the same for stored procedures.
//! Each one resolves its connection at construction, either borrowed from a
//! named transaction or freshly acquired and owned, and must be closed
//! explicitly with [`Statement::close`].

mod callable;
mod plain;
mod prepared;

pub use callable::CallableStatement;
pub use plain::PlainStatement;
pub use prepared::PreparedStatement;

use crate::db::connection::SharedConnection;
use crate::db::transaction_registry::TransactionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{IsolationLevel, RowSet, SqlParam, StatementDescriptor};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a statement's connection came from.
#[derive(Debug)]
pub enum ConnectionSource {
    /// Acquired by the statement; closed with it.
    Owned(SharedConnection),
    /// Belongs to a transaction handle or the caller; never closed here.
    Borrowed {
        transaction: Option<String>,
        connection: SharedConnection,
    },
}

impl ConnectionSource {
    pub fn connection(&self) -> &SharedConnection {
        match self {
            Self::Owned(connection) => connection,
            Self::Borrowed { connection, .. } => connection,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Resolve the connection for `descriptor`.
    ///
    /// With a transaction name the handle's connection is borrowed (handle
    /// and connection are created if needed); otherwise a new autocommit
    /// connection is acquired and owned.
    pub async fn resolve(
        registry: &TransactionRegistry,
        descriptor: &StatementDescriptor,
    ) -> DbResult<Self> {
        if let Some(name) = descriptor.transaction_name() {
            let handle = registry
                .get(name, true)
                .await?
                .ok_or_else(|| DbError::no_connection(format!("transaction {}", name)))?;
            let connection = registry
                .get_connection(&handle, true)
                .await?
                .ok_or_else(|| DbError::no_connection(format!("transaction {}", name)))?;
            return Ok(Self::Borrowed {
                transaction: Some(name.to_string()),
                connection,
            });
        }

        let connection = registry
            .provider()
            .acquire(true, IsolationLevel::ReadCommitted)
            .await?;
        Ok(Self::Owned(SharedConnection::new(connection)))
    }
}

/// One queued batch entry: its SQL and the parameters bound at `add_batch`.
#[derive(Debug, Clone)]
struct BatchEntry {
    sql: String,
    params: Vec<SqlParam>,
}

/// State shared by every statement variant.
///
/// The connection source is dropped on close, so `source == None` means the
/// statement is closed.
#[derive(Debug)]
pub struct StatementCore {
    kind: &'static str,
    descriptor: StatementDescriptor,
    source: Option<ConnectionSource>,
    params: Vec<Option<SqlParam>>,
    batch: Vec<BatchEntry>,
    query_timeout: Option<Duration>,
    max_rows: Option<usize>,
    update_count: Option<u64>,
    result_set: Option<RowSet>,
}

impl StatementCore {
    fn new(kind: &'static str, descriptor: StatementDescriptor, source: ConnectionSource) -> Self {
        Self {
            kind,
            descriptor,
            source: Some(source),
            params: Vec::new(),
            batch: Vec::new(),
            query_timeout: None,
            max_rows: None,
            update_count: None,
            result_set: None,
        }
    }

    /// Resolve a connection and check it can host a statement.
    ///
    /// When `prepare` is set the descriptor's SQL is compiled up front. On
    /// failure an owned connection is released before the error is returned.
    async fn open(
        kind: &'static str,
        registry: &TransactionRegistry,
        descriptor: StatementDescriptor,
        prepare: bool,
    ) -> DbResult<Self> {
        let source = ConnectionSource::resolve(registry, &descriptor).await?;
        Self::on_source(kind, descriptor, source, prepare).await
    }

    async fn on_source(
        kind: &'static str,
        descriptor: StatementDescriptor,
        source: ConnectionSource,
        prepare: bool,
    ) -> DbResult<Self> {
        let mut core = Self::new(kind, descriptor, source);
        if let Err(e) = core.create_native(prepare).await {
            core.close().await;
            return Err(e);
        }
        debug!(kind = kind, descriptor = %core.descriptor, owned = core.is_connection_owned(), "Statement created");
        Ok(core)
    }

    async fn create_native(&self, prepare: bool) -> DbResult<()> {
        let sql = self.descriptor.sql().unwrap_or_default();
        let connection = self.connection("create")?;
        let mut conn = connection.lock().await;
        if conn.is_closed() {
            return Err(DbError::prepare_failed(sql, "connection is closed"));
        }
        if prepare {
            // Driver errors already arrive as StatementPrepareFailed
            conn.prepare(sql).await?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    fn is_connection_owned(&self) -> bool {
        self.source.as_ref().is_some_and(ConnectionSource::is_owned)
    }

    fn connection(&self, operation: &str) -> DbResult<&SharedConnection> {
        self.source
            .as_ref()
            .map(ConnectionSource::connection)
            .ok_or_else(|| DbError::statement_closed(operation))
    }

    fn ensure_open(&self, operation: &str) -> DbResult<()> {
        self.connection(operation).map(|_| ())
    }

    fn required_sql(&self) -> DbResult<String> {
        match self.descriptor.sql() {
            Some(sql) if !sql.trim().is_empty() => Ok(sql.to_string()),
            _ => Err(DbError::invalid_argument("sql required")),
        }
    }

    fn set_parameter(&mut self, index: usize, param: SqlParam) -> DbResult<()> {
        self.ensure_open("set_parameter")?;
        if index == 0 {
            return Err(DbError::invalid_argument("parameter index starts at 1"));
        }
        crate::db::params::check_bindable(index, &param)?;
        if self.params.len() < index {
            self.params.resize(index, None);
        }
        self.params[index - 1] = Some(param);
        Ok(())
    }

    fn clear_parameters(&mut self) -> DbResult<()> {
        self.ensure_open("clear_parameters")?;
        self.params.clear();
        Ok(())
    }

    /// Parameters in position order; every position must be set.
    fn bound_params(&self) -> DbResult<Vec<SqlParam>> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                param
                    .clone()
                    .ok_or_else(|| DbError::invalid_argument(format!("parameter {} not set", i + 1)))
            })
            .collect()
    }

    fn add_batch(&mut self, sql: String, params: Vec<SqlParam>) -> DbResult<()> {
        self.ensure_open("add_batch")?;
        self.batch.push(BatchEntry { sql, params });
        Ok(())
    }

    async fn timed<T, F>(&self, operation: &str, future: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>> + Send,
    {
        match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| DbError::timeout(operation, limit.as_secs()))?,
            None => future.await,
        }
    }

    async fn run_update(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        let connection = self.connection("execute_update")?.clone();
        let rows = self
            .timed("execute_update", async {
                connection.lock().await.execute(sql, params).await
            })
            .await?;
        self.update_count = Some(rows);
        self.result_set = None;
        Ok(rows)
    }

    async fn run_query(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<RowSet> {
        let connection = self.connection("execute_query")?.clone();
        let max_rows = self.max_rows;
        let rows = self
            .timed("execute_query", async {
                connection.lock().await.fetch(sql, params, max_rows).await
            })
            .await?;
        self.update_count = None;
        Ok(rows)
    }

    /// Run `sql` and report whether it produced rows, keeping them for
    /// [`Statement::result_set`].
    async fn run_execute(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<bool> {
        if returns_rows(sql) {
            let rows = self.run_query(sql, params).await?;
            self.result_set = Some(rows);
            Ok(true)
        } else {
            self.run_update(sql, params).await?;
            Ok(false)
        }
    }

    async fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        self.ensure_open("execute_batch")?;
        let batch = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(batch.len());
        for entry in &batch {
            counts.push(self.run_update(&entry.sql, &entry.params).await?);
        }
        debug!(kind = self.kind, statements = counts.len(), "Batch executed");
        Ok(counts)
    }

    async fn close(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        self.batch.clear();
        self.result_set = None;
        if let ConnectionSource::Owned(connection) = source {
            connection.close_quietly().await;
        }
        debug!(kind = self.kind, descriptor = %self.descriptor, "Statement closed");
    }
}

impl Drop for StatementCore {
    fn drop(&mut self) {
        if self.source.is_some() {
            warn!(
                kind = self.kind,
                descriptor = %self.descriptor,
                "Statement dropped without close"
            );
        }
    }
}

/// Whether `sql` is expected to produce a row set, judged by its first keyword.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    matches!(
        keyword.to_ascii_uppercase().as_str(),
        "SELECT" | "WITH" | "VALUES" | "SHOW" | "PRAGMA" | "EXPLAIN" | "DESCRIBE" | "DESC"
    )
}

/// Lifecycle and forwarded operations common to every statement variant.
///
/// After [`close`](Statement::close) every operation except `close` and
/// `is_closed` fails with `StatementClosed`.
#[async_trait]
pub trait Statement: Send + Sync {
    #[doc(hidden)]
    fn core(&self) -> &StatementCore;

    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut StatementCore;

    /// Run the statement's current SQL and buffer the whole result.
    async fn get_row_set(&mut self) -> DbResult<RowSet>;

    fn descriptor(&self) -> DbResult<&StatementDescriptor> {
        let core = self.core();
        core.ensure_open("descriptor")?;
        Ok(&core.descriptor)
    }

    fn sql(&self) -> DbResult<Option<&str>> {
        Ok(self.descriptor()?.sql())
    }

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    /// Release the statement and, if owned, its connection. Idempotent.
    async fn close(&mut self) {
        self.core_mut().close().await;
    }

    /// Commit an owned, non-autocommit connection. No-op otherwise.
    async fn commit(&mut self) -> DbResult<()> {
        let core = self.core();
        let connection = core.connection("commit")?;
        if !core.is_connection_owned() {
            return Ok(());
        }
        let mut conn = connection.lock().await;
        if conn.auto_commit() {
            return Ok(());
        }
        conn.commit().await
    }

    /// Whether closing the statement also closes its connection.
    fn is_connection_owned(&self) -> DbResult<bool> {
        let core = self.core();
        core.ensure_open("is_connection_owned")?;
        Ok(core.is_connection_owned())
    }

    fn connection(&self) -> DbResult<SharedConnection> {
        self.core().connection("connection").cloned()
    }

    /// Limit for each execution; `None` waits indefinitely.
    fn set_query_timeout(&mut self, timeout: Option<Duration>) -> DbResult<()> {
        let core = self.core_mut();
        core.ensure_open("set_query_timeout")?;
        core.query_timeout = timeout.filter(|t| !t.is_zero());
        Ok(())
    }

    fn query_timeout(&self) -> DbResult<Option<Duration>> {
        let core = self.core();
        core.ensure_open("query_timeout")?;
        Ok(core.query_timeout)
    }

    /// Cap on buffered rows; `None` keeps everything.
    fn set_max_rows(&mut self, max_rows: Option<usize>) -> DbResult<()> {
        let core = self.core_mut();
        core.ensure_open("set_max_rows")?;
        core.max_rows = max_rows.filter(|max| *max > 0);
        Ok(())
    }

    fn max_rows(&self) -> DbResult<Option<usize>> {
        let core = self.core();
        core.ensure_open("max_rows")?;
        Ok(core.max_rows)
    }

    /// Rows affected by the last update, `None` after a query.
    fn update_count(&self) -> DbResult<Option<u64>> {
        let core = self.core();
        core.ensure_open("update_count")?;
        Ok(core.update_count)
    }

    /// Rows kept by the last `execute` that produced a row set.
    fn result_set(&self) -> DbResult<Option<&RowSet>> {
        let core = self.core();
        core.ensure_open("result_set")?;
        Ok(core.result_set.as_ref())
    }

    async fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        self.core_mut().execute_batch().await
    }

    fn clear_batch(&mut self) -> DbResult<()> {
        let core = self.core_mut();
        core.ensure_open("clear_batch")?;
        core.batch.clear();
        Ok(())
    }
}
