use serde_json::{json, Value};
use statekit::{CacheConfig, Clock, ManualClock, TtlCache};
use std::sync::Arc;
use std::time::Duration;

fn manual_cache(max_entries: Option<usize>) -> (TtlCache, ManualClock) {
    let clock = ManualClock::default();
    let config = CacheConfig {
        default_ttl_secs: 60,
        max_entries,
    };
    (TtlCache::with_config(&config, Arc::new(clock.clone())), clock)
}

/// Test that JSON payloads come back as stored.
#[test]
fn test_json_value_round_trip() {
    let cache = TtlCache::new();
    cache.set_cached("user-42", json!({"id": 42, "name": "ada"}));

    let value = cache.get_cached_as::<Value>("user-42").unwrap();
    assert_eq!(value["name"], "ada");
}

/// Test that a zero TTL entry is never observable.
#[test]
fn test_zero_ttl_never_visible() {
    let (cache, _clock) = manual_cache(None);
    cache.set_cached_with_ttl("k", 1u8, Duration::ZERO);

    assert!(cache.get_cached("k").is_none());
    assert!(!cache.contains("k"));
    assert!(cache.expires_at("k").is_none());
}

/// Test that configured default TTL drives expiry.
#[test]
fn test_configured_default_ttl() {
    let (cache, clock) = manual_cache(None);
    cache.set_cached("k", "v");
    assert_eq!(cache.default_ttl(), Duration::from_secs(60));

    clock.advance(Duration::from_secs(59));
    assert!(cache.contains("k"));

    clock.advance(Duration::from_secs(1));
    assert!(cache.get_cached("k").is_none());
}

/// Test that expires_at reports set time plus TTL.
#[test]
fn test_expires_at() {
    let (cache, clock) = manual_cache(None);
    let start = clock.now();
    cache.set_cached_with_ttl("k", 0u8, Duration::from_secs(5));

    assert_eq!(cache.expires_at("k"), Some(start + Duration::from_secs(5)));
}

/// Test that each key expires independently.
#[test]
fn test_keys_expire_independently() {
    let (cache, clock) = manual_cache(None);
    cache.set_cached_with_ttl("short", 1u8, Duration::from_secs(1));
    cache.set_cached_with_ttl("long", 2u8, Duration::from_secs(100));

    clock.advance(Duration::from_secs(10));

    assert!(cache.get_cached("short").is_none());
    assert_eq!(cache.get_cached_as::<u8>("long").as_deref(), Some(&2));
    assert_eq!(cache.purge_expired(), 0);
    assert_eq!(cache.len(), 1);
}

/// Test that a bounded cache never grows past its limit.
#[test]
fn test_bounded_cache_respects_limit() {
    let (cache, clock) = manual_cache(Some(3));
    for i in 0..10u64 {
        cache.set_cached_with_ttl(format!("k{i}"), i, Duration::from_secs(100 + i));
        clock.advance(Duration::from_millis(10));
        assert!(cache.len() <= 3);
    }

    // The three entries with the latest expiry survive.
    assert!(cache.contains("k7"));
    assert!(cache.contains("k8"));
    assert!(cache.contains("k9"));
}

/// Test that clones of a cached value share one allocation.
#[test]
fn test_cached_values_are_shared() {
    let cache = TtlCache::new();
    cache.set_cached("big", vec![0u8; 1024]);

    let a = cache.get_cached_as::<Vec<u8>>("big").unwrap();
    let b = cache.get_cached_as::<Vec<u8>>("big").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

/// Test concurrent readers and writers on one cache.
#[test]
fn test_concurrent_access() {
    let cache = Arc::new(TtlCache::new());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k{}", i % 20);
                    cache.set_cached(key.clone(), t * 1000 + i);
                    let _ = cache.get_cached(&key);
                    if i % 50 == 0 {
                        cache.clear_cached(&key);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.len() <= 20);
}
