use super::{Statement, StatementCore};
use crate::db::transaction_registry::TransactionRegistry;
use crate::error::DbResult;
use crate::models::{RowSet, StatementDescriptor};
use async_trait::async_trait;

/// Statement whose SQL is supplied with each call.
///
/// Every executing call records its SQL in the descriptor, so
/// [`Statement::sql`] and [`Statement::get_row_set`] refer to the most
/// recent text.
#[derive(Debug)]
pub struct PlainStatement {
    core: StatementCore,
}

impl PlainStatement {
    pub async fn new(
        registry: &TransactionRegistry,
        descriptor: StatementDescriptor,
    ) -> DbResult<Self> {
        let core = StatementCore::open("plain", registry, descriptor, false).await?;
        Ok(Self { core })
    }

    fn record_sql(&mut self, operation: &str, sql: &str) -> DbResult<()> {
        self.core.ensure_open(operation)?;
        self.core.descriptor.set_sql(sql);
        Ok(())
    }

    pub async fn execute_query(&mut self, sql: &str) -> DbResult<RowSet> {
        self.record_sql("execute_query", sql)?;
        self.core.run_query(sql, &[]).await
    }

    pub async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
        self.record_sql("execute_update", sql)?;
        self.core.run_update(sql, &[]).await
    }

    /// Returns true when `sql` produced a row set.
    pub async fn execute(&mut self, sql: &str) -> DbResult<bool> {
        self.record_sql("execute", sql)?;
        self.core.run_execute(sql, &[]).await
    }

    pub fn add_batch(&mut self, sql: &str) -> DbResult<()> {
        self.record_sql("add_batch", sql)?;
        self.core.add_batch(sql.to_string(), Vec::new())
    }
}

#[async_trait]
impl Statement for PlainStatement {
    fn core(&self) -> &StatementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StatementCore {
        &mut self.core
    }

    async fn get_row_set(&mut self) -> DbResult<RowSet> {
        self.core.ensure_open("get_row_set")?;
        let sql = self.core.required_sql()?;
        self.core.run_query(&sql, &[]).await
    }
}
