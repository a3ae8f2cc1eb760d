//! Integration tests for cache containers and the cache registry.

use chrono::Duration;
use db_kernel::cache::{
    CacheConfig, CacheContainer, CacheRegistry, ClearListener, ClearVetoed, ManualClock,
};
use std::sync::Arc;
use std::thread;

fn cache(
    registry: &CacheRegistry,
    name: &str,
    expire_minutes: u32,
    clock: &Arc<ManualClock>,
) -> Arc<CacheContainer<i32, String>> {
    CacheContainer::register(
        CacheConfig::new(name)
            .expire_minutes(expire_minutes)
            .clock(clock.clone()),
        registry,
    )
}

#[test]
fn test_zero_expiry_never_clears() {
    let registry = CacheRegistry::new();
    let clock = Arc::new(ManualClock::default());
    let cache = cache(&registry, "Static", 0, &clock);
    cache.put_all((0..10).map(|i| (i, i.to_string())));

    for _ in 0..5 {
        clock.advance(Duration::days(400));
        assert_eq!(cache.len(), 10);
        assert!(cache.contains_key(&3));
    }
}

#[test]
fn test_one_minute_expiry() {
    let registry = CacheRegistry::new();
    let clock = Arc::new(ManualClock::default());
    let cache = cache(&registry, "Short", 1, &clock);
    cache.put(1, "one".to_string());

    clock.advance(Duration::seconds(61));
    assert_eq!(cache.get(&1), None);
    assert_eq!(cache.len(), 0);
    assert!(cache.is_reset());
}

#[test]
fn test_reset_by_prefix() {
    let registry = CacheRegistry::new();
    let clock = Arc::new(ManualClock::default());
    let order = cache(&registry, "Order", 0, &clock);
    let order_line = cache(&registry, "OrderLine", 0, &clock);
    let customer = cache(&registry, "Customer", 0, &clock);

    order.put_all((0..3).map(|i| (i, "o".to_string())));
    order_line.put_all((0..4).map(|i| (i, "l".to_string())));
    customer.put_all((0..5).map(|i| (i, "c".to_string())));

    assert_eq!(registry.reset_by_prefix("Order"), 7);
    assert!(order.is_empty());
    assert!(order_line.is_empty());
    assert_eq!(customer.len(), 5);
    assert_eq!(registry.total_live_elements(), 5);
    assert_eq!(registry.instance_count(), 3);
}

#[test]
fn test_reset_by_prefix_without_match() {
    let registry = CacheRegistry::new();
    let clock = Arc::new(ManualClock::default());
    let customer = cache(&registry, "Customer", 0, &clock);
    customer.put(1, "c".to_string());

    assert_eq!(registry.reset_by_prefix("Order"), 0);
    assert_eq!(customer.len(), 1);
}

struct Pinned;

impl ClearListener for Pinned {
    fn before_clear(&self, cache_name: &str, size: usize) -> Result<(), ClearVetoed> {
        if size > 0 {
            return Err(ClearVetoed::new(cache_name, "pinned"));
        }
        Ok(())
    }
}

#[test]
fn test_vetoed_cache_counts_nothing() {
    let registry = CacheRegistry::new();
    let clock = Arc::new(ManualClock::default());
    let pinned = cache(&registry, "Pinned", 0, &clock);
    let loose = cache(&registry, "Loose", 0, &clock);
    pinned.put(1, "p".to_string());
    loose.put(1, "l".to_string());
    pinned.add_clear_listener(Arc::new(Pinned));

    assert_eq!(registry.reset_all(), 1);
    assert_eq!(pinned.len(), 1);
    assert!(loose.is_empty());
}

#[test]
fn test_concurrent_access_across_expiry() {
    let registry = CacheRegistry::new();
    let clock = Arc::new(ManualClock::default());
    let cache = cache(&registry, "Shared", 1, &clock);
    cache.put_all((0..100).map(|i| (i, i.to_string())));
    clock.advance(Duration::minutes(2));

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let key = 1000 + t * 50 + i;
                    cache.put(key, key.to_string());
                    let _ = cache.get(&key);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // The old entries expired exactly once; no new writes were lost
    assert!(!cache.contains_key(&0));
    assert_eq!(cache.len(), 400);
}
