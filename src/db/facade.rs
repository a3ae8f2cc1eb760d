//! Database facade.
//!
//! [`Db`] is the single entry point for running SQL: it builds statement
//! proxies, binds parameters, executes, and decides which failures are
//! logged and turned into a `-1` sentinel and which are propagated.

use crate::db::connection::SharedConnection;
use crate::db::params::check_all_bindable;
use crate::db::statement::{CallableStatement, PlainStatement, PreparedStatement, Statement};
use crate::db::transaction_registry::TransactionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{
    IsolationLevel, ResultSetConcurrency, ResultSetType, RowSet, SqlParam, StatementDescriptor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Separator between statements in [`Db::execute_update_multiple`].
pub const SQL_STATEMENT_SEPARATOR: &str = "; ";

/// Outcome of [`Db::execute_script`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    pub statements: usize,
    /// Rows affected by the statements that succeeded.
    pub rows_affected: i64,
    pub failed: usize,
}

impl ScriptSummary {
    fn record(&mut self, rows: i64) {
        self.statements += 1;
        if rows < 0 {
            self.failed += 1;
        } else {
            self.rows_affected += rows;
        }
    }

    /// Row counts summed with `-1` for every failed statement.
    pub fn total(&self) -> i64 {
        self.rows_affected - self.failed as i64
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Entry point for executing SQL, optionally inside a named transaction.
#[derive(Debug, Clone)]
pub struct Db {
    registry: Arc<TransactionRegistry>,
    query_timeout: Option<Duration>,
}

impl Db {
    pub fn new(registry: Arc<TransactionRegistry>) -> Self {
        Self {
            registry,
            query_timeout: None,
        }
    }

    /// Timeout applied when an execution helper is not given one.
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    /// Check that a connection can be acquired and answers a ping.
    pub async fn is_connected(&self) -> bool {
        let mut conn = match self
            .registry
            .provider()
            .acquire(true, IsolationLevel::ReadCommitted)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Database not reachable");
                return false;
            }
        };
        let ping = conn.ping().await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Ignoring connection close failure");
        }
        match ping {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Database ping failed");
                false
            }
        }
    }

    pub async fn create_statement(
        &self,
        result_set_type: ResultSetType,
        result_set_concurrency: ResultSetConcurrency,
        trx_name: Option<&str>,
    ) -> DbResult<PlainStatement> {
        let descriptor = StatementDescriptor::new(
            result_set_type,
            result_set_concurrency,
            None,
            trx_name.map(String::from),
        );
        PlainStatement::new(&self.registry, descriptor).await
    }

    /// Forward-only, updatable prepared statement.
    pub async fn prepare_statement(
        &self,
        sql: &str,
        trx_name: Option<&str>,
    ) -> DbResult<PreparedStatement> {
        self.prepare_statement_with(
            sql,
            ResultSetType::ForwardOnly,
            ResultSetConcurrency::Updatable,
            trx_name,
        )
        .await
    }

    pub async fn prepare_statement_with(
        &self,
        sql: &str,
        result_set_type: ResultSetType,
        result_set_concurrency: ResultSetConcurrency,
        trx_name: Option<&str>,
    ) -> DbResult<PreparedStatement> {
        let descriptor =
            StatementDescriptor::with_sql(result_set_type, result_set_concurrency, sql, trx_name);
        PreparedStatement::new(&self.registry, descriptor).await
    }

    /// Prepared statement on a connection the caller keeps ownership of.
    pub async fn prepare_statement_on(
        &self,
        connection: SharedConnection,
        sql: &str,
    ) -> DbResult<PreparedStatement> {
        let descriptor = StatementDescriptor::with_sql(
            ResultSetType::ForwardOnly,
            ResultSetConcurrency::ReadOnly,
            sql,
            None,
        );
        PreparedStatement::on_connection(connection, descriptor).await
    }

    pub async fn prepare_call(
        &self,
        sql: &str,
        result_set_type: ResultSetType,
        result_set_concurrency: ResultSetConcurrency,
        trx_name: Option<&str>,
    ) -> DbResult<CallableStatement> {
        let descriptor =
            StatementDescriptor::with_sql(result_set_type, result_set_concurrency, sql, trx_name);
        CallableStatement::new(&self.registry, descriptor).await
    }

    /// Log an execution helper's reference to a transaction nobody registered.
    ///
    /// Execution still goes ahead in a newly created handle.
    pub async fn verify_trx(&self, trx_name: Option<&str>) -> bool {
        let Some(name) = trx_name else {
            return true;
        };
        if self.registry.contains(name).await {
            return true;
        }
        error!(trx_name = %name, "Transaction not found");
        false
    }

    /// Prepare `sql` with `params` bound, ready to execute.
    async fn prepared_with_params(
        &self,
        sql: &str,
        params: &[SqlParam],
        trx_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> DbResult<PreparedStatement> {
        // Rejected before a connection is touched
        check_all_bindable(params)?;
        self.verify_trx(trx_name).await;

        let mut stmt = self.prepare_statement(sql, trx_name).await?;
        let setup = stmt
            .set_query_timeout(timeout.or(self.query_timeout))
            .and_then(|()| stmt.set_parameters(params));
        if let Err(e) = setup {
            stmt.close().await;
            return Err(e);
        }
        Ok(stmt)
    }

    /// Execute an update and return the affected row count.
    ///
    /// Execution failures are logged (at info level when `ignore_error` is
    /// set, error level otherwise) and reported as `Ok(-1)`. Failures building
    /// the statement are returned as errors.
    pub async fn execute_update(
        &self,
        sql: &str,
        params: &[SqlParam],
        ignore_error: bool,
        trx_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> DbResult<i64> {
        let mut stmt = self
            .prepared_with_params(sql, params, trx_name, timeout)
            .await?;
        let result = stmt.execute_update().await;
        stmt.close().await;

        match result {
            Ok(rows) => {
                debug!(sql = %sql, rows_affected = rows, trx_name = ?trx_name, "Update executed");
                Ok(i64::try_from(rows).unwrap_or(i64::MAX))
            }
            Err(e) => {
                if ignore_error {
                    info!(sql = %sql, trx_name = ?trx_name, error = %e, "Update failed (ignored)");
                } else {
                    error!(sql = %sql, trx_name = ?trx_name, error = %e, "Update failed");
                }
                Ok(-1)
            }
        }
    }

    /// Execute an update, propagating every failure.
    pub async fn execute_update_ex(
        &self,
        sql: &str,
        params: &[SqlParam],
        trx_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> DbResult<u64> {
        let mut stmt = self
            .prepared_with_params(sql, params, trx_name, timeout)
            .await?;
        let result = stmt.execute_update().await;
        stmt.close().await;
        let rows = result?;
        debug!(sql = %sql, rows_affected = rows, trx_name = ?trx_name, "Update executed");
        Ok(rows)
    }

    /// Split `sql` on [`SQL_STATEMENT_SEPARATOR`] and execute each part.
    ///
    /// Every statement is attempted and its result added to the total, so a
    /// failed statement contributes `-1`. Text without a separator returns
    /// [`execute_update`](Db::execute_update)'s result unchanged.
    pub async fn execute_update_multiple(
        &self,
        sql: &str,
        ignore_error: bool,
        trx_name: Option<&str>,
    ) -> DbResult<i64> {
        Ok(self.execute_script(sql, ignore_error, trx_name).await?.total())
    }

    /// Like [`execute_update_multiple`](Db::execute_update_multiple), but
    /// keeps successful row counts and failures apart.
    pub async fn execute_script(
        &self,
        sql: &str,
        ignore_error: bool,
        trx_name: Option<&str>,
    ) -> DbResult<ScriptSummary> {
        if sql.trim().is_empty() {
            return Err(DbError::invalid_argument("No SQL"));
        }

        let mut summary = ScriptSummary::default();
        if !sql.contains(SQL_STATEMENT_SEPARATOR) {
            let rows = self
                .execute_update(sql.trim(), &[], ignore_error, trx_name, None)
                .await?;
            summary.record(rows);
            return Ok(summary);
        }

        for statement in sql
            .split(SQL_STATEMENT_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            match self
                .execute_update(statement, &[], ignore_error, trx_name, None)
                .await
            {
                Ok(rows) => summary.record(rows),
                // Construction failures are not swallowed by execute_update
                Err(e) => {
                    if ignore_error {
                        info!(sql = %statement, error = %e, "Statement skipped (ignored)");
                    } else {
                        error!(sql = %statement, error = %e, "Statement skipped");
                    }
                    summary.record(-1);
                }
            }
        }
        debug!(
            statements = summary.statements,
            rows_affected = summary.rows_affected,
            failed = summary.failed,
            "Script executed"
        );
        Ok(summary)
    }

    /// Commit the named transaction; `None` means autocommit and succeeds.
    pub async fn commit(&self, throw_on_error: bool, trx_name: Option<&str>) -> DbResult<bool> {
        self.end(throw_on_error, trx_name, true).await
    }

    /// Roll back the named transaction; `None` means autocommit and succeeds.
    pub async fn rollback(&self, throw_on_error: bool, trx_name: Option<&str>) -> DbResult<bool> {
        self.end(throw_on_error, trx_name, false).await
    }

    async fn end(&self, throw_on_error: bool, trx_name: Option<&str>, commit: bool) -> DbResult<bool> {
        let Some(name) = trx_name else {
            return Ok(true);
        };
        let Some(handle) = self.registry.get(name, false).await? else {
            if throw_on_error {
                return Err(DbError::transaction_not_found(name));
            }
            error!(trx_name = %name, "Transaction not found");
            return Ok(false);
        };
        if commit {
            self.registry.commit(&handle, throw_on_error).await
        } else {
            self.registry.rollback(&handle, throw_on_error).await
        }
    }

    /// Run a query outside any transaction and buffer the whole result.
    pub async fn get_row_set(&self, sql: &str, params: &[SqlParam]) -> DbResult<RowSet> {
        check_all_bindable(params)?;
        let mut stmt = self
            .prepare_statement_with(
                sql,
                ResultSetType::ScrollInsensitive,
                ResultSetConcurrency::ReadOnly,
                None,
            )
            .await?;
        let result = match stmt.set_parameters(params) {
            Ok(()) => stmt.get_row_set().await,
            Err(e) => Err(e),
        };
        stmt.close().await;
        result
    }

    /// First column of the first row as an integer, or -1 when there is none.
    pub async fn get_sql_value_ex(
        &self,
        trx_name: Option<&str>,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<i32> {
        let mut stmt = self.prepared_with_params(sql, params, trx_name, None).await?;
        let result = stmt.execute_query().await;
        stmt.close().await;
        Ok(result?.first_int().unwrap_or(-1))
    }

    /// Like [`get_sql_value_ex`](Db::get_sql_value_ex), but failures are
    /// logged and reported as -1.
    pub async fn get_sql_value(&self, trx_name: Option<&str>, sql: &str, params: &[SqlParam]) -> i32 {
        match self.get_sql_value_ex(trx_name, sql, params).await {
            Ok(value) => value,
            Err(e) => {
                error!(sql = %sql, trx_name = ?trx_name, error = %e, "Value query failed");
                -1
            }
        }
    }
}
