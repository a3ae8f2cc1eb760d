//! Named transaction registry.
//!
//! A transaction name binds one logical unit of work to one connection, so
//! call sites that never see each other can run inside the same database
//! transaction by agreeing on a name. Each registered [`TransactionHandle`]
//! holds its connection from first use until commit or rollback.

use crate::db::connection::{ConnectionProvider, SharedConnection};
use crate::error::{DbError, DbResult};
use crate::models::IsolationLevel;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Isolation level requested for transaction connections.
pub const TRANSACTION_ISOLATION: IsolationLevel = IsolationLevel::ReadCommitted;

/// Metadata about a registered transaction (for listing without locking it for long).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransactionMetadata {
    pub name: String,
    pub active: bool,
    /// When the current unit of work started, if one is in progress
    pub started_at: Option<DateTime<Utc>>,
    pub has_connection: bool,
}

#[derive(Default)]
struct HandleState {
    connection: Option<SharedConnection>,
    active: bool,
    start_time: Option<DateTime<Utc>>,
}

impl HandleState {
    fn start(&mut self, name: &str) -> bool {
        if self.active {
            warn!(trx_name = %name, "Transaction already in progress");
            return false;
        }
        self.active = true;
        self.start_time = Some(Utc::now());
        debug!(trx_name = %name, "Transaction started");
        true
    }

    fn finish(&mut self) -> Option<SharedConnection> {
        self.active = false;
        self.start_time = None;
        self.connection.take()
    }
}

/// One logical unit of work, identified by name.
///
/// Handles are created by [`TransactionRegistry::get`] and stay registered
/// after commit or rollback; the next unit of work under the same name gets a
/// fresh connection.
pub struct TransactionHandle {
    name: String,
    state: Mutex<HandleState>,
}

impl TransactionHandle {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub async fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.start_time
    }

    pub async fn has_connection(&self) -> bool {
        self.state.lock().await.connection.is_some()
    }

    /// Mark the unit of work as started.
    ///
    /// Returns false (and warns) if it was already active.
    pub async fn start(&self) -> bool {
        self.state.lock().await.start(&self.name)
    }

    async fn metadata(&self) -> TransactionMetadata {
        let state = self.state.lock().await;
        TransactionMetadata {
            name: self.name.clone(),
            active: state.active,
            started_at: state.start_time,
            has_connection: state.connection.is_some(),
        }
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trx[{}]", self.name)
    }
}

/// Registry mapping transaction names to handles.
///
/// Constructed once per connection provider and shared behind an `Arc`.
pub struct TransactionRegistry {
    provider: Arc<dyn ConnectionProvider>,
    transactions: RwLock<HashMap<String, Arc<TransactionHandle>>>,
}

impl TransactionRegistry {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Provider used for transaction and statement connections.
    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    /// Generate a unique transaction name, e.g. `import_3f2a...`.
    pub fn create_trx_name(prefix: &str) -> String {
        let prefix = if prefix.is_empty() { "Trx" } else { prefix };
        format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
    }

    /// Look up the handle for `name`, creating it when `create_new` is set.
    ///
    /// Concurrent callers asking for the same name always get the same handle.
    pub async fn get(
        &self,
        name: &str,
        create_new: bool,
    ) -> DbResult<Option<Arc<TransactionHandle>>> {
        if name.is_empty() {
            return Err(DbError::invalid_argument("No Transaction Name"));
        }

        {
            let txs = self.transactions.read().await;
            if let Some(handle) = txs.get(name) {
                return Ok(Some(handle.clone()));
            }
        }
        if !create_new {
            return Ok(None);
        }

        // Re-checked under the write lock: only one caller inserts
        let mut txs = self.transactions.write().await;
        let handle = txs
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(trx_name = %name, "Transaction registered");
                Arc::new(TransactionHandle::new(name))
            })
            .clone();
        Ok(Some(handle))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.transactions.read().await.contains_key(name)
    }

    /// Get the number of registered transactions.
    pub async fn count(&self) -> usize {
        self.transactions.read().await.len()
    }

    /// List all registered transactions with their metadata.
    pub async fn list_all(&self) -> Vec<TransactionMetadata> {
        let handles: Vec<Arc<TransactionHandle>> =
            self.transactions.read().await.values().cloned().collect();
        let mut all = Vec::with_capacity(handles.len());
        for handle in handles {
            all.push(handle.metadata().await);
        }
        all
    }

    async fn is_registered(&self, handle: &Arc<TransactionHandle>) -> bool {
        self.transactions
            .read()
            .await
            .get(handle.name())
            .is_some_and(|registered| Arc::ptr_eq(registered, handle))
    }

    /// Connection of the handle, acquiring one (autocommit off) on first use.
    ///
    /// Returns `None` when the handle has no connection and `create_new` is
    /// false, or when asked to create a connection for a handle this registry
    /// does not know.
    pub async fn get_connection(
        &self,
        handle: &Arc<TransactionHandle>,
        create_new: bool,
    ) -> DbResult<Option<SharedConnection>> {
        // Checked before taking the handle lock; the map lock is never
        // acquired while a handle lock is held
        if create_new && !self.is_registered(handle).await {
            error!(trx_name = %handle.name(), "Transaction not registered; refusing to open a connection");
            return Ok(None);
        }

        let mut state = handle.state.lock().await;
        if let Some(connection) = &state.connection {
            return Ok(Some(connection.clone()));
        }
        if !create_new {
            return Ok(None);
        }

        let connection = self
            .provider
            .acquire(false, TRANSACTION_ISOLATION)
            .await?;
        let connection = SharedConnection::new(connection);
        state.connection = Some(connection.clone());
        if !state.active {
            state.start(handle.name());
        }
        info!(trx_name = %handle.name(), "Transaction connection acquired");
        Ok(Some(connection))
    }

    /// Commit the handle's work and release its connection.
    ///
    /// Returns false when there was nothing to commit, or when the commit
    /// failed and `throw_on_error` is not set.
    pub async fn commit(
        &self,
        handle: &TransactionHandle,
        throw_on_error: bool,
    ) -> DbResult<bool> {
        self.end(handle, throw_on_error, true).await
    }

    /// Roll back the handle's work and release its connection.
    pub async fn rollback(
        &self,
        handle: &TransactionHandle,
        throw_on_error: bool,
    ) -> DbResult<bool> {
        self.end(handle, throw_on_error, false).await
    }

    async fn end(
        &self,
        handle: &TransactionHandle,
        throw_on_error: bool,
        commit: bool,
    ) -> DbResult<bool> {
        let action = if commit { "commit" } else { "rollback" };
        let connection = handle.state.lock().await.finish();
        let Some(connection) = connection else {
            debug!(trx_name = %handle.name(), action = action, "No connection to end");
            return Ok(false);
        };

        let result = {
            let mut conn = connection.lock().await;
            if commit {
                conn.commit().await
            } else {
                conn.rollback().await
            }
        };
        // Released on every path; close rolls back whatever a failed commit left
        connection.close_quietly().await;

        match result {
            Ok(()) => {
                info!(trx_name = %handle.name(), action = action, "Transaction ended");
                Ok(true)
            }
            Err(e) => {
                error!(trx_name = %handle.name(), action = action, error = %e, "Transaction end failed");
                if throw_on_error { Err(e) } else { Ok(false) }
            }
        }
    }

    /// Roll back outstanding work and unregister `name`.
    ///
    /// Returns false if no such transaction was registered.
    pub async fn close(&self, name: &str) -> bool {
        let removed = self.transactions.write().await.remove(name);
        match removed {
            Some(handle) => {
                // Failures are already logged by rollback
                let _ = self.rollback(&handle, false).await;
                info!(trx_name = %name, "Transaction closed");
                true
            }
            None => false,
        }
    }

    /// Roll back and unregister every transaction. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<TransactionHandle>> = {
            let mut txs = self.transactions.write().await;
            txs.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &drained {
            if handle.is_active().await {
                warn!(trx_name = %handle.name(), "Rolling back open transaction on shutdown");
            }
            let _ = self.rollback(handle, false).await;
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "All transactions closed");
        }
        drained.len()
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("db_type", &self.provider.db_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::pool::PoolProvider;
    use crate::models::ConnectionConfig;

    async fn memory_registry() -> TransactionRegistry {
        let options = PoolOptions {
            max_connections: Some(4),
            ..PoolOptions::default()
        };
        let config = ConnectionConfig::new("sqlite::memory:", None, options).unwrap();
        let provider = PoolProvider::connect(&config).await.unwrap();
        TransactionRegistry::new(Arc::new(provider))
    }

    #[test]
    fn test_create_trx_name_format() {
        let name = TransactionRegistry::create_trx_name("import");
        assert!(name.starts_with("import_"));
        assert_eq!(name.len(), "import_".len() + 32);
        assert_ne!(name, TransactionRegistry::create_trx_name("import"));
    }

    #[test]
    fn test_create_trx_name_default_prefix() {
        assert!(TransactionRegistry::create_trx_name("").starts_with("Trx_"));
    }

    #[tokio::test]
    async fn test_get_rejects_empty_name() {
        let registry = memory_registry().await;
        let result = registry.get("", true).await;
        assert!(matches!(result, Err(DbError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_get_without_create_returns_none() {
        let registry = memory_registry().await;
        assert!(registry.get("T1", false).await.unwrap().is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_get_returns_same_handle() {
        let registry = memory_registry().await;
        let first = registry.get("T1", true).await.unwrap().unwrap();
        let second = registry.get("T1", false).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_active().await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_get_connection_lazily_acquires_and_starts() {
        let registry = memory_registry().await;
        let handle = registry.get("T1", true).await.unwrap().unwrap();

        assert!(registry.get_connection(&handle, false).await.unwrap().is_none());

        let conn = registry.get_connection(&handle, true).await.unwrap().unwrap();
        assert!(!conn.lock().await.auto_commit());
        assert!(handle.is_active().await);
        assert!(handle.start_time().await.is_some());

        let again = registry.get_connection(&handle, false).await.unwrap().unwrap();
        assert!(conn.ptr_eq(&again));
    }

    #[tokio::test]
    async fn test_get_connection_for_foreign_handle_is_refused() {
        let registry = memory_registry().await;
        let other = memory_registry().await;
        let foreign = other.get("T1", true).await.unwrap().unwrap();

        assert!(registry.get_connection(&foreign, true).await.unwrap().is_none());
        assert!(!foreign.has_connection().await);
    }

    #[tokio::test]
    async fn test_commit_releases_connection() {
        let registry = memory_registry().await;
        let handle = registry.get("T1", true).await.unwrap().unwrap();
        let conn = registry.get_connection(&handle, true).await.unwrap().unwrap();

        assert!(registry.commit(&handle, true).await.unwrap());
        assert!(!handle.is_active().await);
        assert!(!handle.has_connection().await);
        assert!(conn.lock().await.is_closed());

        // Still registered; the next unit of work gets a fresh connection
        assert!(registry.contains("T1").await);
        let fresh = registry.get_connection(&handle, true).await.unwrap().unwrap();
        assert!(!fresh.ptr_eq(&conn));
    }

    #[tokio::test]
    async fn test_commit_without_connection_returns_false() {
        let registry = memory_registry().await;
        let handle = registry.get("T1", true).await.unwrap().unwrap();
        assert!(!registry.commit(&handle, true).await.unwrap());
        assert!(!registry.rollback(&handle, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_start_twice_warns() {
        let registry = memory_registry().await;
        let handle = registry.get("T1", true).await.unwrap().unwrap();
        assert!(handle.start().await);
        assert!(!handle.start().await);
    }

    #[tokio::test]
    async fn test_list_all_and_close() {
        let registry = memory_registry().await;
        let handle = registry.get("T1", true).await.unwrap().unwrap();
        registry.get_connection(&handle, true).await.unwrap();
        registry.get("T2", true).await.unwrap();

        let mut all = registry.list_all().await;
        all.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(all.len(), 2);
        assert!(all[0].active && all[0].has_connection);
        assert!(!all[1].active && !all[1].has_connection);

        assert!(registry.close("T1").await);
        assert!(!registry.close("T1").await);
        assert!(!handle.has_connection().await);
        assert_eq!(registry.close_all().await, 1);
        assert_eq!(registry.count().await, 0);
    }
}
