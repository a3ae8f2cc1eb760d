//! db-kernel - run a SQL script through the database kernel.
//!
//! Statements are separated by "; " and executed one by one, optionally
//! inside a named transaction that is committed (or rolled back) at the end.

use clap::Parser;
use db_kernel::config::Config;
use db_kernel::db::{Db, PoolProvider, TransactionRegistry};
use db_kernel::models::ConnectionConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!("Starting db-kernel v{}", env!("CARGO_PKG_VERSION"));

    let db_config = config.parse_database()?;
    let conn_config = ConnectionConfig::new(
        db_config.connection_string,
        db_config.database,
        db_config.pool_options,
    )?;

    let provider = Arc::new(PoolProvider::connect(&conn_config).await?);
    let registry = Arc::new(TransactionRegistry::new(provider.clone()));
    let db = Db::new(registry.clone()).with_query_timeout(config.query_timeout_duration());

    let trx_name = config.trx_name.as_deref();
    if let Some(name) = trx_name {
        // Registered up front so the script does not log it as unknown
        registry.get(name, true).await?;
    }

    let result = db
        .execute_script(&config.sql, config.ignore_error, trx_name)
        .await;

    // Failed statements only commit when the caller asked to ignore them
    let commit = !config.rollback
        && matches!(&result, Ok(summary) if config.ignore_error || !summary.has_failures());
    let ended = if commit {
        db.commit(true, trx_name).await
    } else {
        db.rollback(true, trx_name).await
    };
    registry.close_all().await;
    provider.close().await;

    let summary = result?;
    ended?;
    println!("{}", summary.total());
    info!(
        rows_affected = summary.rows_affected,
        failed = summary.failed,
        committed = commit,
        "Script finished"
    );
    if summary.has_failures() && !config.ignore_error {
        return Err(format!("{} statement(s) failed", summary.failed).into());
    }
    Ok(())
}
