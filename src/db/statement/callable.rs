use super::{PreparedStatement, Statement, StatementCore};
use crate::db::transaction_registry::TransactionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{RowSet, SqlParam, StatementDescriptor};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Stored procedure call.
///
/// Accepts the `{call proc(?, ?)}` escape as well as native `CALL` syntax.
/// Values the procedure returns as a result row are read with
/// [`get_object`](CallableStatement::get_object).
#[derive(Debug)]
pub struct CallableStatement {
    inner: PreparedStatement,
}

impl CallableStatement {
    pub async fn new(
        registry: &TransactionRegistry,
        mut descriptor: StatementDescriptor,
    ) -> DbResult<Self> {
        if let Some(native) = descriptor.sql().and_then(call_escape_to_native) {
            descriptor.set_sql(native);
        }
        let inner = PreparedStatement::open("callable", registry, descriptor).await?;
        Ok(Self { inner })
    }

    pub fn set_parameter(&mut self, index: usize, param: impl Into<SqlParam>) -> DbResult<()> {
        self.inner.set_parameter(index, param)
    }

    pub fn set_parameters(&mut self, params: &[SqlParam]) -> DbResult<()> {
        self.inner.set_parameters(params)
    }

    pub fn clear_parameters(&mut self) -> DbResult<()> {
        self.inner.clear_parameters()
    }

    pub async fn execute_query(&mut self) -> DbResult<RowSet> {
        self.inner.fetch_all().await
    }

    pub async fn execute_update(&mut self) -> DbResult<u64> {
        self.inner.execute_update().await
    }

    /// Run the call. Returns true when it produced a result set, even an
    /// empty one.
    pub async fn execute(&mut self) -> DbResult<bool> {
        let rows = self.inner.fetch_all().await?;
        Ok(!rows.columns().is_empty())
    }

    pub fn add_batch(&mut self) -> DbResult<()> {
        self.inner.add_batch()
    }

    /// Column `index` (1-based) of the first row returned by the last call.
    pub fn get_object(&self, index: usize) -> DbResult<Option<JsonValue>> {
        self.core().ensure_open("get_object")?;
        if index == 0 {
            return Err(DbError::invalid_argument("column index starts at 1"));
        }
        let rows = self
            .result_set()?
            .ok_or_else(|| DbError::invalid_argument("statement has not been executed"))?;
        Ok(rows.row(0).and_then(|row| row.get(index - 1)).cloned())
    }
}

/// `{call p(?)}` -> `CALL p(?)`; `None` when the text is not an escape.
fn call_escape_to_native(sql: &str) -> Option<String> {
    let body = sql.trim().strip_prefix('{')?.strip_suffix('}')?.trim();
    let (keyword, rest) = body.split_at_checked(4)?;
    if !keyword.eq_ignore_ascii_case("call") {
        return None;
    }
    Some(format!("CALL {}", rest.trim()))
}

#[async_trait]
impl Statement for CallableStatement {
    fn core(&self) -> &StatementCore {
        self.inner.core()
    }

    fn core_mut(&mut self) -> &mut StatementCore {
        self.inner.core_mut()
    }

    async fn get_row_set(&mut self) -> DbResult<RowSet> {
        self.execute_query().await
    }
}
