//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use db_kernel::config::PoolOptions;
use db_kernel::db::{ConnectionProvider, Db, DbConnection, PoolProvider, TransactionRegistry};
use db_kernel::error::{DbError, DbResult};
use db_kernel::models::{ColumnMetadata, ConnectionConfig, DatabaseType, IsolationLevel, RowSet, SqlParam};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// SQL containing this marker fails at execution time.
pub const FAIL_MARKER: &str = "FAIL";
/// SQL containing this marker fails to prepare.
pub const BAD_SYNTAX_MARKER: &str = "BAD SYNTAX";
/// Queries containing this marker return columns but no rows.
pub const EMPTY_MARKER: &str = "EMPTY";
/// Queries containing this marker return no result set at all.
pub const NO_RESULT_MARKER: &str = "NO RESULT";

/// Counters shared between a [`TrackingProvider`] and its connections.
#[derive(Debug, Default)]
pub struct Tracker {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
}

impl Tracker {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connections acquired and not yet closed.
    pub fn open_now(&self) -> usize {
        self.opened() - self.closed()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

/// In-memory provider that records every connection it hands out.
#[derive(Debug, Default)]
pub struct TrackingProvider {
    pub tracker: Arc<Tracker>,
}

impl TrackingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ConnectionProvider for TrackingProvider {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn acquire(
        &self,
        auto_commit: bool,
        isolation: IsolationLevel,
    ) -> DbResult<Box<dyn DbConnection>> {
        self.tracker.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackingConnection {
            tracker: self.tracker.clone(),
            auto_commit,
            isolation,
            closed: false,
        }))
    }
}

pub struct TrackingConnection {
    tracker: Arc<Tracker>,
    auto_commit: bool,
    isolation: IsolationLevel,
    closed: bool,
}

impl TrackingConnection {
    fn check_open(&self) -> DbResult<()> {
        if self.closed {
            return Err(DbError::no_connection("connection is closed"));
        }
        Ok(())
    }

    fn run(&self, sql: &str) -> DbResult<()> {
        self.check_open()?;
        if sql.contains(FAIL_MARKER) {
            return Err(DbError::execution("simulated failure", Some("HY000".to_string())));
        }
        self.tracker.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }
}

#[async_trait]
impl DbConnection for TrackingConnection {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.check_open()?;
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn transaction_isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn set_transaction_isolation(&mut self, level: IsolationLevel) -> DbResult<()> {
        self.check_open()?;
        self.isolation = level;
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> DbResult<()> {
        self.check_open()?;
        if sql.contains(BAD_SYNTAX_MARKER) {
            return Err(DbError::prepare_failed(sql, "syntax error"));
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str, _params: &[SqlParam]) -> DbResult<u64> {
        self.run(sql)?;
        Ok(1)
    }

    async fn fetch(
        &mut self,
        sql: &str,
        _params: &[SqlParam],
        _max_rows: Option<usize>,
    ) -> DbResult<RowSet> {
        self.run(sql)?;
        if sql.contains(NO_RESULT_MARKER) {
            return Ok(RowSet::default());
        }
        let columns = vec![ColumnMetadata::new("value", "INTEGER")];
        if sql.contains(EMPTY_MARKER) {
            return Ok(RowSet::new(columns, Vec::new(), false));
        }
        Ok(RowSet::new(columns, vec![vec![serde_json::json!(42)]], false))
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.tracker.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.tracker.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.check_open()
    }

    async fn close(&mut self) -> DbResult<()> {
        if !self.closed {
            self.closed = true;
            self.tracker.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Registry and facade over a fresh [`TrackingProvider`].
pub fn tracking_db() -> (Db, Arc<TransactionRegistry>, Arc<Tracker>) {
    let provider = TrackingProvider::new();
    let tracker = provider.tracker.clone();
    let registry = Arc::new(TransactionRegistry::new(provider));
    (Db::new(registry.clone()), registry, tracker)
}

/// SQLite database in a temporary file. Keep the returned file alive for
/// the duration of the test.
pub async fn sqlite_db() -> (Db, Arc<PoolProvider>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
    let options = PoolOptions {
        max_connections: Some(5),
        ..PoolOptions::default()
    };
    let config = ConnectionConfig::new(url, None, options).unwrap();
    let provider = Arc::new(PoolProvider::connect(&config).await.unwrap());
    let registry = Arc::new(TransactionRegistry::new(provider.clone()));
    (Db::new(registry), provider, temp_file)
}
