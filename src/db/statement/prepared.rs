use super::{ConnectionSource, Statement, StatementCore};
use crate::db::connection::SharedConnection;
use crate::db::transaction_registry::TransactionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{RowSet, SqlParam, StatementDescriptor};
use async_trait::async_trait;

/// Precompiled statement with positional (1-based) parameters.
///
/// The SQL is fixed at construction and compiled on the connection right
/// away, so syntax errors surface as `StatementPrepareFailed` before any
/// parameter is bound.
#[derive(Debug)]
pub struct PreparedStatement {
    core: StatementCore,
}

impl PreparedStatement {
    pub async fn new(
        registry: &TransactionRegistry,
        descriptor: StatementDescriptor,
    ) -> DbResult<Self> {
        Self::open("prepared", registry, descriptor).await
    }

    /// Prepare on a caller-supplied connection, which the statement never closes.
    pub async fn on_connection(
        connection: SharedConnection,
        descriptor: StatementDescriptor,
    ) -> DbResult<Self> {
        require_sql(&descriptor)?;
        let source = ConnectionSource::Borrowed {
            transaction: descriptor.transaction_name().map(String::from),
            connection,
        };
        let core = StatementCore::on_source("prepared", descriptor, source, true).await?;
        Ok(Self { core })
    }

    pub(super) async fn open(
        kind: &'static str,
        registry: &TransactionRegistry,
        descriptor: StatementDescriptor,
    ) -> DbResult<Self> {
        require_sql(&descriptor)?;
        let core = StatementCore::open(kind, registry, descriptor, true).await?;
        Ok(Self { core })
    }

    pub fn set_parameter(&mut self, index: usize, param: impl Into<SqlParam>) -> DbResult<()> {
        self.core.set_parameter(index, param.into())
    }

    /// Replace all parameters, binding `params[0]` to position 1.
    ///
    /// Every value is checked before any is bound.
    pub fn set_parameters(&mut self, params: &[SqlParam]) -> DbResult<()> {
        crate::db::params::check_all_bindable(params)?;
        self.core.clear_parameters()?;
        for (i, param) in params.iter().enumerate() {
            self.core.set_parameter(i + 1, param.clone())?;
        }
        Ok(())
    }

    pub fn clear_parameters(&mut self) -> DbResult<()> {
        self.core.clear_parameters()
    }

    fn sql_and_params(&self, operation: &str) -> DbResult<(String, Vec<SqlParam>)> {
        self.core.ensure_open(operation)?;
        Ok((self.core.required_sql()?, self.core.bound_params()?))
    }

    pub async fn execute_query(&mut self) -> DbResult<RowSet> {
        let (sql, params) = self.sql_and_params("execute_query")?;
        self.core.run_query(&sql, &params).await
    }

    pub async fn execute_update(&mut self) -> DbResult<u64> {
        let (sql, params) = self.sql_and_params("execute_update")?;
        self.core.run_update(&sql, &params).await
    }

    /// Returns true when the statement produced a row set.
    pub async fn execute(&mut self) -> DbResult<bool> {
        let (sql, params) = self.sql_and_params("execute")?;
        self.core.run_execute(&sql, &params).await
    }

    /// Queue the current parameter values for [`Statement::execute_batch`].
    pub fn add_batch(&mut self) -> DbResult<()> {
        let (sql, params) = self.sql_and_params("add_batch")?;
        self.core.add_batch(sql, params)
    }

    /// Run and buffer every row, also when the SQL is not a plain query.
    pub(super) async fn fetch_all(&mut self) -> DbResult<RowSet> {
        let (sql, params) = self.sql_and_params("execute")?;
        let rows = self.core.run_query(&sql, &params).await?;
        self.core.result_set = Some(rows.clone());
        Ok(rows)
    }
}

fn require_sql(descriptor: &StatementDescriptor) -> DbResult<()> {
    match descriptor.sql() {
        Some(sql) if !sql.trim().is_empty() => Ok(()),
        _ => Err(DbError::invalid_argument("sql required")),
    }
}

#[async_trait]
impl Statement for PreparedStatement {
    fn core(&self) -> &StatementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StatementCore {
        &mut self.core
    }

    async fn get_row_set(&mut self) -> DbResult<RowSet> {
        self.execute_query().await
    }
}
