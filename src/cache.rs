use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// Last seen content of recent messages, keyed by message id. Lets edit
/// handling tell a text change apart from an embed refresh when the
/// gateway does not carry the old message.
#[derive(Clone)]
pub struct ContentCache {
    cache: Arc<Mutex<LruCache<u64, String>>>,
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<u64, String>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, message_id: u64, content: &str) {
        self.lock().put(message_id, content.to_string());
    }

    #[cfg(test)]
    fn get(&self, message_id: u64) -> Option<String> {
        self.lock().get(&message_id).cloned()
    }

    /// Stores the new content and returns what was cached before.
    pub fn replace(&self, message_id: u64, content: &str) -> Option<String> {
        self.lock().put(message_id, content.to_string())
    }

    pub fn remove(&self, message_id: u64) {
        self.lock().pop(&message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_lru() {
        let cache = ContentCache::new(2);
        cache.insert(1, "one");
        cache.insert(2, "two");

        // Touch 1 so 2 becomes least recently used
        assert_eq!(cache.get(1).as_deref(), Some("one"));
        cache.insert(3, "three");

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_replace_returns_previous() {
        let cache = ContentCache::new(10);
        assert_eq!(cache.replace(5, "before"), None);
        assert_eq!(cache.replace(5, "after").as_deref(), Some("before"));
        assert_eq!(cache.get(5).as_deref(), Some("after"));

        cache.remove(5);
        assert!(cache.get(5).is_none());
    }

    #[test]
    fn test_zero_capacity_falls_back() {
        let cache = ContentCache::new(0);
        cache.insert(1, "x");
        assert!(cache.get(1).is_some());
    }
}
