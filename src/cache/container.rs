//! Time-to-live cache container.

use super::clock::{Clock, SystemClock};
use super::registry::{CacheRegistry, ManagedCache};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Minutes a container lives before clearing itself, unless configured.
pub const DEFAULT_EXPIRE_MINUTES: u32 = 120;

/// Raised by a [`ClearListener`] to keep the cache contents.
#[derive(Debug, Clone, Error)]
#[error("clear of cache {cache} vetoed: {reason}")]
pub struct ClearVetoed {
    pub cache: String,
    pub reason: String,
}

impl ClearVetoed {
    pub fn new(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
            reason: reason.into(),
        }
    }
}

/// Notified before a container is cleared; may veto the clear.
pub trait ClearListener: Send + Sync {
    fn before_clear(&self, cache_name: &str, size: usize) -> Result<(), ClearVetoed>;
}

/// Settings for a new [`CacheContainer`].
#[derive(Clone)]
pub struct CacheConfig {
    name: String,
    capacity: usize,
    expire_minutes: u32,
    clock: Arc<dyn Clock>,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: 0,
            expire_minutes: DEFAULT_EXPIRE_MINUTES,
            clock: Arc::new(SystemClock),
        }
    }

    /// Initial capacity hint.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// 0 disables expiry.
    pub fn expire_minutes(mut self, minutes: u32) -> Self {
        self.expire_minutes = minutes;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("expire_minutes", &self.expire_minutes)
            .finish_non_exhaustive()
    }
}

struct CacheState<K, V> {
    entries: HashMap<K, V>,
    expire_minutes: u32,
    expires_at: Option<DateTime<Utc>>,
    /// Emptied and not written to since
    just_reset: bool,
}

impl<K, V> CacheState<K, V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn schedule_expiry(&mut self, now: DateTime<Utc>) {
        self.expires_at = (self.expire_minutes > 0)
            .then(|| now + Duration::minutes(i64::from(self.expire_minutes)));
    }
}

/// Named key/value map that empties itself once its expiry time passes.
///
/// Every operation first checks expiry; an expired container clears itself
/// (listeners permitting) before the operation runs. Concurrent expiry checks
/// may clear more than once, never less.
pub struct CacheContainer<K, V> {
    name: String,
    clock: Arc<dyn Clock>,
    state: RwLock<CacheState<K, V>>,
    listeners: RwLock<Vec<Arc<dyn ClearListener>>>,
}

impl<K, V> CacheContainer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a container that is not registered anywhere.
    pub fn new(config: CacheConfig) -> Self {
        let mut state = CacheState {
            entries: HashMap::with_capacity(config.capacity),
            expire_minutes: config.expire_minutes,
            expires_at: None,
            just_reset: true,
        };
        state.schedule_expiry(config.clock.now());
        Self {
            name: config.name,
            clock: config.clock,
            state: RwLock::new(state),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState<K, V>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState<K, V>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self) {
        let due = self.read().is_expired(self.clock.now());
        if due {
            if let Some(evicted) = self.clear_entries(true) {
                info!(cache = %self.name, evicted = evicted, "Cache expired");
            }
        }
    }

    /// Clear unless a listener vetoes. With `only_if_expired`, a container
    /// another caller already refreshed is left alone.
    ///
    /// Returns the number of evicted entries, `None` if nothing was cleared.
    fn clear_entries(&self, only_if_expired: bool) -> Option<usize> {
        let size = self.read().entries.len();
        let listeners: Vec<Arc<dyn ClearListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            if let Err(veto) = listener.before_clear(&self.name, size) {
                info!(cache = %self.name, reason = %veto.reason, "Cache clear vetoed");
                return None;
            }
        }

        let now = self.clock.now();
        let mut state = self.write();
        if only_if_expired && !state.is_expired(now) {
            return None;
        }
        let evicted = state.entries.len();
        state.entries.clear();
        state.just_reset = true;
        state.schedule_expiry(now);
        debug!(cache = %self.name, evicted = evicted, "Cache cleared");
        Some(evicted)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.expire();
        self.read().entries.get(key).cloned()
    }

    /// Insert and return the previous value for `key`.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.expire();
        let mut state = self.write();
        state.just_reset = false;
        state.entries.insert(key, value)
    }

    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        self.expire();
        let mut state = self.write();
        state.just_reset = false;
        state.entries.extend(entries);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.expire();
        self.write().entries.remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.expire();
        self.read().entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.expire();
        self.read().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.expire();
        self.read().entries.len()
    }

    /// Entry count without checking expiry first.
    pub fn size_no_expire(&self) -> usize {
        self.read().entries.len()
    }

    pub fn keys(&self) -> Vec<K> {
        self.expire();
        self.read().entries.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.expire();
        self.read().entries.values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.expire();
        self.read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove every entry and restart the expiry window.
    ///
    /// Returns false if a listener vetoed the clear.
    pub fn clear(&self) -> bool {
        self.clear_entries(false).is_some()
    }

    /// Clear and return the number of entries actually evicted (0 if vetoed).
    pub fn reset(&self) -> usize {
        self.clear_entries(false).unwrap_or(0)
    }

    /// True when emptied and not written to since.
    pub fn is_reset(&self) -> bool {
        self.read().just_reset
    }

    /// Mark the container as in use without writing to it.
    pub fn set_used(&self) {
        self.write().just_reset = false;
    }

    pub fn expire_minutes(&self) -> u32 {
        self.read().expire_minutes
    }

    /// Change the expiry window; the new window starts now.
    pub fn set_expire_minutes(&self, minutes: u32) {
        let now = self.clock.now();
        let mut state = self.write();
        state.expire_minutes = minutes;
        state.schedule_expiry(now);
    }

    pub fn add_clear_listener(&self, listener: Arc<dyn ClearListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Returns false if the listener was not attached.
    pub fn remove_clear_listener(&self, listener: &Arc<dyn ClearListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }
}

impl<K, V> CacheContainer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    pub fn contains_value(&self, value: &V) -> bool {
        self.expire();
        self.read().entries.values().any(|v| v == value)
    }
}

impl<K, V> CacheContainer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a container and register it with `registry`.
    pub fn register(config: CacheConfig, registry: &CacheRegistry) -> Arc<Self> {
        let cache = Arc::new(Self::new(config));
        registry.register(cache.clone());
        cache
    }
}

impl<K, V> ManagedCache for CacheContainer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) -> usize {
        CacheContainer::reset(self)
    }

    fn len(&self) -> usize {
        CacheContainer::len(self)
    }

    fn size_no_expire(&self) -> usize {
        CacheContainer::size_no_expire(self)
    }
}

impl<K, V> std::fmt::Display for CacheContainer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        write!(
            f,
            "CacheContainer[{},Exp={},#={}]",
            self.name,
            state.expire_minutes,
            state.entries.len()
        )
    }
}

impl<K, V> std::fmt::Debug for CacheContainer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContainer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn cache_with_clock(expire_minutes: u32) -> (CacheContainer<String, i32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = CacheConfig::new("Order")
            .expire_minutes(expire_minutes)
            .clock(clock.clone());
        (CacheContainer::new(config), clock)
    }

    struct Veto;

    impl ClearListener for Veto {
        fn before_clear(&self, cache_name: &str, _size: usize) -> Result<(), ClearVetoed> {
            Err(ClearVetoed::new(cache_name, "in use"))
        }
    }

    #[test]
    fn test_default_expiry() {
        let cache: CacheContainer<String, i32> = CacheContainer::new(CacheConfig::new("x"));
        assert_eq!(cache.expire_minutes(), DEFAULT_EXPIRE_MINUTES);
    }

    #[test]
    fn test_put_get_remove() {
        let (cache, _) = cache_with_clock(0);
        assert!(cache.is_reset());
        assert_eq!(cache.put("a".into(), 1), None);
        assert_eq!(cache.put("a".into(), 2), Some(1));
        assert!(!cache.is_reset());
        assert_eq!(cache.get(&"a".into()), Some(2));
        assert!(cache.contains_key(&"a".into()));
        assert!(cache.contains_value(&2));
        assert_eq!(cache.remove(&"a".into()), Some(2));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_never_expires_with_zero_minutes() {
        let (cache, clock) = cache_with_clock(0);
        cache.put("a".into(), 1);
        clock.advance(Duration::days(365));
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_reset());
    }

    #[test]
    fn test_expires_after_window() {
        let (cache, clock) = cache_with_clock(1);
        cache.put("a".into(), 1);
        clock.advance(Duration::seconds(59));
        assert_eq!(cache.get(&"a".into()), Some(1));

        clock.advance(Duration::seconds(2));
        assert_eq!(cache.get(&"a".into()), None);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_reset());
    }

    #[test]
    fn test_expiry_restarts_window() {
        let (cache, clock) = cache_with_clock(1);
        clock.advance(Duration::seconds(61));
        assert!(cache.is_empty());
        cache.put("b".into(), 2);
        clock.advance(Duration::seconds(30));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reset_returns_evicted_count() {
        let (cache, _) = cache_with_clock(0);
        cache.put_all([("a".to_string(), 1), ("b".to_string(), 2)]);
        cache.set_used();
        assert_eq!(cache.reset(), 2);
        assert_eq!(cache.size_no_expire(), 0);
        assert!(cache.is_reset());
    }

    #[test]
    fn test_vetoed_clear_keeps_entries() {
        let (cache, _) = cache_with_clock(0);
        cache.put("a".into(), 1);
        let veto: Arc<dyn ClearListener> = Arc::new(Veto);
        cache.add_clear_listener(veto.clone());

        assert!(!cache.clear());
        assert_eq!(cache.reset(), 0);
        assert_eq!(cache.len(), 1);

        assert!(cache.remove_clear_listener(&veto));
        assert!(!cache.remove_clear_listener(&veto));
        assert_eq!(cache.reset(), 1);
    }

    #[test]
    fn test_vetoed_expiry_keeps_entries() {
        let (cache, clock) = cache_with_clock(1);
        cache.put("a".into(), 1);
        cache.add_clear_listener(Arc::new(Veto));
        clock.advance(Duration::minutes(5));
        assert_eq!(cache.get(&"a".into()), Some(1));
    }

    #[test]
    fn test_display() {
        let (cache, _) = cache_with_clock(5);
        cache.put("a".into(), 1);
        assert_eq!(cache.to_string(), "CacheContainer[Order,Exp=5,#=1]");
    }
}
