//! String-keyed cache with per-entry expiry.
//!
//! The cache is independent of the entity and collection stores: nothing
//! populates or invalidates it automatically. Callers encode whatever
//! structure they need into the key (e.g. `"user-42"`).
//!
//! Expiry is lazy. An entry is absent from the moment `now >= expires_at`;
//! reads drop expired entries they touch, and [`TtlCache::purge_expired`]
//! sweeps the rest. A TTL too large to represent as a point in time stores an
//! entry that never expires. With `max_entries` set, inserting a new key into
//! a full cache first purges expired entries, then evicts the entry closest
//! to expiry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;

/// Type-erased cached value. Clone is an `Arc` clone.
#[derive(Clone)]
pub struct CachedValue {
    inner: Arc<dyn Any + Send + Sync>,
}

impl CachedValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Shared handle to the value if it is a `T`.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }
}

impl fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedValue")
            .field("type_id", &(*self.inner).type_id())
            .finish()
    }
}

/// One cache slot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    /// `None` when `now + ttl` overflows; such an entry never expires.
    pub expires_at: Option<SystemTime>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    /// Five minutes.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl: config.default_ttl(),
            max_entries: config.max_entries,
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `value` under `key` for the default TTL, replacing any entry.
    pub fn set_cached<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.set_cached_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` under `key` for `ttl`. A zero TTL stores an entry that
    /// is already expired.
    pub fn set_cached_with_ttl<V>(&self, key: impl Into<String>, value: V, ttl: Duration)
    where
        V: Any + Send + Sync,
    {
        let key = key.into();
        let now = self.clock.now();
        let entry = CacheEntry {
            value: CachedValue::new(value),
            expires_at: now.checked_add(ttl),
        };

        let mut entries = self.entries.lock();
        if let Some(max) = self.max_entries {
            if !entries.contains_key(&key) && entries.len() >= max {
                make_room(&mut entries, max, now);
            }
        }
        entries.insert(key, entry);
    }

    /// Value under `key`, or `None` if absent or expired.
    pub fn get_cached(&self, key: &str) -> Option<CachedValue> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Typed read. `None` on miss, expiry, or a value of another type.
    pub fn get_cached_as<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_cached(key)?.downcast_arc::<T>()
    }

    /// Expiry time of a live entry. `None` if the key is absent, expired, or
    /// never expires.
    pub fn expires_at(&self, key: &str) -> Option<SystemTime> {
        self.live(key, |entry| entry.expires_at).flatten()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live(key, |_| ()).is_some()
    }

    /// Remove one entry. Returns whether an entry (live or expired) existed.
    pub fn clear_cached(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear_all_cache(&self) {
        self.entries.lock().clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live<R>(&self, key: &str, f: impl FnOnce(&CacheEntry) -> R) -> Option<R> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(f)
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

fn make_room(entries: &mut HashMap<String, CacheEntry>, max: usize, now: SystemTime) {
    entries.retain(|_, entry| !entry.is_expired(now));
    while entries.len() >= max {
        let victim = entries
            .iter()
            // Entries without an expiry sort after every timed one.
            .min_by_key(|(_, entry)| (entry.expires_at.is_none(), entry.expires_at))
            .map(|(key, _)| key.clone());
        let Some(victim) = victim else {
            break;
        };
        entries.remove(&victim);
        tracing::debug!(key = %victim, "evicted cache entry closest to expiry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_with(clock: &ManualClock, max_entries: Option<usize>) -> TtlCache {
        let config = CacheConfig {
            max_entries,
            ..CacheConfig::default()
        };
        TtlCache::with_config(&config, Arc::new(clock.clone()))
    }

    #[test]
    fn set_and_get() {
        let cache = TtlCache::new();
        cache.set_cached("user-1", "ada".to_string());

        let v = cache.get_cached("user-1").unwrap();
        assert_eq!(v.downcast_ref::<String>(), Some(&"ada".to_string()));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = TtlCache::new();
        assert!(cache.get_cached("nope").is_none());
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        let cache = TtlCache::new();
        cache.set_cached_with_ttl("k", 1u32, Duration::ZERO);
        assert!(cache.get_cached("k").is_none());
    }

    #[test]
    fn entry_expires_at_boundary() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, None);
        cache.set_cached_with_ttl("k", 1u32, Duration::from_secs(10));

        clock.advance(Duration::from_secs(9));
        assert!(cache.get_cached("k").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get_cached("k").is_none());
    }

    #[test]
    fn default_ttl_is_five_minutes() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, None);
        cache.set_cached("k", 1u32);

        assert_eq!(cache.default_ttl(), Duration::from_secs(300));
        clock.advance(Duration::from_secs(299));
        assert!(cache.contains("k"));
        clock.advance(Duration::from_secs(1));
        assert!(!cache.contains("k"));
    }

    #[test]
    fn overwrite_resets_expiry() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, None);
        cache.set_cached_with_ttl("k", 1u32, Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        cache.set_cached_with_ttl("k", 2u32, Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));

        assert_eq!(cache.get_cached_as::<u32>("k").as_deref(), Some(&2));
    }

    #[test]
    fn typed_read_wrong_type_is_none() {
        let cache = TtlCache::new();
        cache.set_cached("k", 1u32);
        assert!(cache.get_cached_as::<String>("k").is_none());
        assert!(cache.get_cached_as::<u32>("k").is_some());
    }

    #[test]
    fn cached_none_differs_from_miss() {
        let cache = TtlCache::new();
        cache.set_cached("k", Option::<u32>::None);

        let v = cache.get_cached("k").unwrap();
        assert_eq!(v.downcast_ref::<Option<u32>>(), Some(&None));
        assert!(cache.get_cached("other").is_none());
    }

    #[test]
    fn clear_cached_removes_one() {
        let cache = TtlCache::new();
        cache.set_cached("a", 1u32);
        cache.set_cached("b", 2u32);

        assert!(cache.clear_cached("a"));
        assert!(!cache.clear_cached("a"));
        assert!(cache.get_cached("a").is_none());
        assert!(cache.get_cached("b").is_some());
    }

    #[test]
    fn clear_all() {
        let cache = TtlCache::new();
        cache.set_cached("a", 1u32);
        cache.set_cached("b", 2u32);
        cache.clear_all_cache();
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_linger_until_read_or_purge() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, None);
        cache.set_cached_with_ttl("a", 1u32, Duration::from_secs(1));
        cache.set_cached_with_ttl("b", 1u32, Duration::from_secs(1));
        cache.set_cached_with_ttl("c", 1u32, Duration::from_secs(60));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.len(), 3);
        assert!(cache.get_cached("a").is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bounded_cache_evicts_closest_to_expiry() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, Some(2));
        cache.set_cached_with_ttl("long", 1u32, Duration::from_secs(100));
        cache.set_cached_with_ttl("short", 2u32, Duration::from_secs(10));
        cache.set_cached_with_ttl("new", 3u32, Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("long"));
        assert!(cache.contains("new"));
        assert!(!cache.contains("short"));
    }

    #[test]
    fn bounded_cache_prefers_purging_expired() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, Some(2));
        cache.set_cached_with_ttl("stale", 1u32, Duration::from_secs(1));
        cache.set_cached_with_ttl("soon", 2u32, Duration::from_secs(20));
        clock.advance(Duration::from_secs(5));
        cache.set_cached_with_ttl("new", 3u32, Duration::from_secs(50));

        assert!(cache.contains("soon"));
        assert!(cache.contains("new"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn huge_ttl_never_expires() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, None);
        cache.set_cached_with_ttl("forever", 1u32, Duration::MAX);

        clock.advance(Duration::from_secs(100 * 365 * 24 * 3600));
        assert_eq!(cache.get_cached_as::<u32>("forever").as_deref(), Some(&1));
        assert!(cache.contains("forever"));
        assert!(cache.expires_at("forever").is_none());
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn huge_default_ttl_from_config() {
        let clock = ManualClock::default();
        let config = CacheConfig {
            default_ttl_secs: u64::MAX,
            max_entries: None,
        };
        let cache = TtlCache::with_config(&config, Arc::new(clock.clone()));
        cache.set_cached("k", 1u32);

        clock.advance(Duration::from_secs(3600));
        assert!(cache.contains("k"));
    }

    #[test]
    fn bounded_cache_evicts_timed_before_unbounded() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, Some(2));
        cache.set_cached_with_ttl("forever", 1u32, Duration::MAX);
        cache.set_cached_with_ttl("timed", 2u32, Duration::from_secs(1000));
        cache.set_cached_with_ttl("new", 3u32, Duration::from_secs(10));

        assert!(cache.contains("forever"));
        assert!(cache.contains("new"));
        assert!(!cache.contains("timed"));
    }

    #[test]
    fn bounded_cache_overwrite_does_not_evict() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, Some(2));
        cache.set_cached("a", 1u32);
        cache.set_cached("b", 2u32);
        cache.set_cached("a", 3u32);

        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
    }
}
