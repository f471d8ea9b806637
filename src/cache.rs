//! Bounded LRU caches for rendered content and search results.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::content::ContentItem;

/// A thread-safe LRU map with string keys.
///
/// Operations on one key are atomic with respect to each other; `get` and
/// `remove` on a missing key are no-ops. `lru` updates recency on read, so
/// every access takes the lock exclusively.
///
/// Every [`remove_all`](Self::remove_all) advances a generation counter.
/// Callers that compute a value outside the lock read [`generation`]
/// first and store with [`set_if_generation`], so a value computed before
/// a clear is never stored after it.
///
/// [`generation`]: Self::generation
/// [`set_if_generation`]: Self::set_if_generation
#[derive(Debug)]
pub struct BoundedCache<V: Clone> {
    name: &'static str,
    entries: Mutex<LruCache<String, V>>,
    generation: AtomicU64,
}

/// Rendered content by normalized key.
pub type ContentCache = BoundedCache<Arc<ContentItem>>;

/// Search result routes by `(strategy, limit, query)`.
pub type SearchCache = BoundedCache<Arc<Vec<String>>>;

impl<V: Clone> BoundedCache<V> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.lock().put(key.into(), value);
    }

    /// Number of wholesale clears so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` only if no clear happened since `generation` was read.
    pub fn set_if_generation(&self, generation: u64, key: impl Into<String>, value: V) -> bool {
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        entries.put(key.into(), value);
        true
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key)
    }

    pub fn remove_all(&self) {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(entries);
        if dropped > 0 {
            crate::debug_event!(self.name, "cleared", "{dropped} entries");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_remove() {
        let cache: BoundedCache<u32> = BoundedCache::new("test", 4);
        assert_eq!(cache.get("a"), None);

        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));

        cache.set("a", 2);
        assert_eq!(cache.get("a"), Some(2));

        assert_eq!(cache.remove("a"), Some(2));
        assert_eq!(cache.remove("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache: BoundedCache<u32> = BoundedCache::new("test", 2);
        cache.set("a", 1);
        cache.set("b", 2);
        // Touch "a" so "b" becomes the eviction candidate
        cache.get("a");
        cache.set("c", 3);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let cache: BoundedCache<u32> = BoundedCache::new("test", 0);
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_remove_all() {
        let cache: BoundedCache<u32> = BoundedCache::new("test", 8);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.set(*key, i as u32);
        }
        cache.remove_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_value_from_before_a_clear_is_not_stored() {
        let cache: BoundedCache<u32> = BoundedCache::new("test", 8);
        let generation = cache.generation();

        // A clear lands while the value is being computed
        cache.remove_all();
        assert!(!cache.set_if_generation(generation, "stale", 1));
        assert!(!cache.contains("stale"));

        let generation = cache.generation();
        assert!(cache.set_if_generation(generation, "fresh", 2));
        assert_eq!(cache.get("fresh"), Some(2));
    }
}
