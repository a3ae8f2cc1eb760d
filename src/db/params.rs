//! Parameter binding for positional statement parameters.
//!
//! Each backend gets its own binder because sqlx query types are
//! backend-specific. Callers validate with [`check_bindable`] first; the
//! binders themselves never see an unbindable value.

use crate::error::{DbError, DbResult};
use crate::models::SqlParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Reject parameters that cannot be bound, reporting the 1-based position.
pub(crate) fn check_bindable(index: usize, param: &SqlParam) -> DbResult<()> {
    if param.is_bindable() {
        Ok(())
    } else {
        Err(DbError::unsupported_parameter(index, param.type_name()))
    }
}

/// Validate a full parameter list.
pub(crate) fn check_all_bindable(params: &[SqlParam]) -> DbResult<()> {
    params
        .iter()
        .enumerate()
        .try_for_each(|(i, p)| check_bindable(i + 1, p))
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Integer(v) => query.bind(*v),
        SqlParam::Decimal(v) => query.bind(v.clone()),
        SqlParam::Timestamp(v) => query.bind(*v),
        SqlParam::Boolean(v) => query.bind(SqlParam::boolean_flag(*v)),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
        SqlParam::Clob(v) => query.bind(v.as_str()),
        _ => query.bind(None::<String>),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Integer(v) => query.bind(*v),
        SqlParam::Decimal(v) => query.bind(v.clone()),
        SqlParam::Timestamp(v) => query.bind(*v),
        SqlParam::Boolean(v) => query.bind(SqlParam::boolean_flag(*v)),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
        SqlParam::Clob(v) => query.bind(v.as_str()),
        _ => query.bind(None::<String>),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Integer(v) => query.bind(*v),
        // SQLite has no decimal type; keep the exact text
        SqlParam::Decimal(v) => query.bind(v.to_string()),
        SqlParam::Timestamp(v) => query.bind(*v),
        SqlParam::Boolean(v) => query.bind(SqlParam::boolean_flag(*v)),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
        SqlParam::Clob(v) => query.bind(v.as_str()),
        _ => query.bind(None::<String>),
    }
}
