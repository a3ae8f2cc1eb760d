//! Database dispatch macros for reducing code duplication.
//!
//! The macros expand to a plain `match` over the backend enums, so each arm
//! is still monomorphic and sqlx can infer the backend from the executor.

/// Match a [`DbPool`](crate::db::pool::DbPool) with one arm per backend.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Run the same body against whichever pooled connection is held.
///
/// Only usable when the body compiles for every backend, e.g. raw control
/// statements or `Connection::ping`.
///
/// ```ignore
/// impl_conn_dispatch!(conn, c => (&mut **c).execute("COMMIT").await.map(|_| ()))
/// ```
#[macro_export]
macro_rules! impl_conn_dispatch {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            $crate::db::connection::PooledConnection::MySql($c) => $body,
            $crate::db::connection::PooledConnection::Postgres($c) => $body,
            $crate::db::connection::PooledConnection::SQLite($c) => $body,
        }
    };
}

pub use impl_conn_dispatch;
pub use impl_db_dispatch;
