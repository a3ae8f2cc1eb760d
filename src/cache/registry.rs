//! Registry of live cache containers.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// What the registry needs from a cache, independent of its key/value types.
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;

    /// Clear and return the number of evicted entries.
    fn reset(&self) -> usize;

    /// Entry count after applying expiry.
    fn len(&self) -> usize;

    fn size_no_expire(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every registered cache, in registration order.
///
/// Resets clear containers but never remove them.
#[derive(Default)]
pub struct CacheRegistry {
    instances: RwLock<Vec<Arc<dyn ManagedCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cache: Arc<dyn ManagedCache>) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cache);
    }

    /// Remove every registration of `cache`. Returns how many were removed.
    pub fn unregister(&self, cache: &dyn ManagedCache) -> usize {
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        let before = instances.len();
        instances.retain(|c| !std::ptr::addr_eq(Arc::as_ptr(c), cache as *const dyn ManagedCache));
        before - instances.len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ManagedCache>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reset every cache. Returns the total number of evicted entries.
    pub fn reset_all(&self) -> usize {
        let caches = self.snapshot();
        let total: usize = caches.iter().map(|c| c.reset()).sum();
        info!(instances = caches.len(), evicted = total, "All caches reset");
        total
    }

    /// Reset every cache whose name starts with `prefix`.
    ///
    /// `"Order"` also matches `"OrderLine"`.
    pub fn reset_by_prefix(&self, prefix: &str) -> usize {
        let caches = self.snapshot();
        let mut matched = 0;
        let mut total = 0;
        for cache in caches.iter().filter(|c| c.name().starts_with(prefix)) {
            matched += 1;
            total += cache.reset();
        }
        info!(prefix = %prefix, instances = matched, evicted = total, "Caches reset");
        total
    }

    /// Entries across all caches, after expiry.
    pub fn total_live_elements(&self) -> usize {
        self.snapshot().iter().map(|c| c.len()).sum()
    }

    pub fn instance_count(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|c| c.name().to_string()).collect()
    }
}

impl std::fmt::Display for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheRegistry[Instances={}]", self.instance_count())
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("names", &self.names())
            .finish()
    }
}
