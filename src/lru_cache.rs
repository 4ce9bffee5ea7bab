//! Bounded least-recently-used cache with per-entry expiry.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

const HEAD: usize = 0;
const TAIL: usize = 1;

struct Entry<K, V> {
    key: K,
    value: V,
    saved_at: DateTime<Utc>,
}

/// Node of the recency list. Nodes live in a slab and link to each other by index; `HEAD` and
/// `TAIL` are sentinels without an entry.
struct Node<K, V> {
    entry: Option<Entry<K, V>>,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    nodes: Vec<Node<K, V>>,
    free: Vec<usize>,
    map: HashMap<K, usize>,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn new() -> Inner<K, V> {
        Inner {
            nodes: vec![
                Node {
                    entry: None,
                    prev: HEAD,
                    next: TAIL,
                },
                Node {
                    entry: None,
                    prev: HEAD,
                    next: TAIL,
                },
            ],
            free: Vec::new(),
            map: HashMap::new(),
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
    }

    /// Link `idx` as the most recently used node.
    fn push_back(&mut self, idx: usize) {
        let last = self.nodes[TAIL].prev;
        self.nodes[idx].prev = last;
        self.nodes[idx].next = TAIL;
        self.nodes[last].next = idx;
        self.nodes[TAIL].prev = idx;
    }

    fn alloc(&mut self, entry: Entry<K, V>) -> usize {
        let node = Node {
            entry: Some(entry),
            prev: HEAD,
            next: TAIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Unlink and free a node, returning its entry.
    fn release(&mut self, idx: usize) -> Option<Entry<K, V>> {
        self.unlink(idx);
        self.free.push(idx);
        self.nodes[idx].entry.take()
    }

    fn remove(&mut self, key: &K) -> Option<Entry<K, V>> {
        let idx = self.map.remove(key)?;
        self.release(idx)
    }

    fn clear(&mut self) {
        *self = Inner::new();
    }
}

/// Thread-safe LRU cache holding at most `max_size` entries, each valid for `timeout` after it
/// was saved.
///
/// A `max_size` of zero disables the cache (nothing is stored). A zero `timeout` disables expiry.
pub struct LruCache<K, V> {
    max_size: usize,
    timeout: Duration,
    inner: RwLock<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `max_size` entries, each for `timeout`.
    pub fn new(max_size: usize, timeout: Duration) -> LruCache<K, V> {
        LruCache {
            max_size,
            timeout,
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Value for `key` if present and not expired. Marks the key as most recently used. An
    /// expired entry is evicted, and if the most recently used entry is expired too, the whole
    /// cache is cleared.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.lookup_at(key, Utc::now())
    }

    /// Insert or replace `key`, evicting least recently used entries beyond `max_size`.
    pub fn save(&self, key: K, value: V) {
        self.save_at(key, value, Utc::now())
    }

    /// Value for `key` without touching recency or checking expiry.
    pub fn peek(&self, key: &K) -> Option<V> {
        let inner = self
            .inner
            .read()
            .expect("thread holding cache lock should not panic");
        let idx = *inner.map.get(key)?;
        inner.nodes[idx].entry.as_ref().map(|e| e.value.clone())
    }

    /// Returns `true` if an entry was removed.
    pub fn remove(&self, key: &K) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove all entries.
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("thread holding cache lock should not panic")
            .map
            .len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner<K, V>> {
        self.inner
            .write()
            .expect("thread holding cache lock should not panic")
    }

    fn is_expired(&self, saved_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.timeout.is_zero() {
            return false;
        }
        // A clock going backwards makes the entry look fresh.
        (now - saved_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.timeout)
    }

    pub(crate) fn lookup_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        if self.max_size == 0 {
            return None;
        }

        let mut inner = self.write();
        let idx = *inner.map.get(key)?;
        let saved_at = inner.nodes[idx].entry.as_ref()?.saved_at;

        if !self.is_expired(saved_at, now) {
            inner.unlink(idx);
            inner.push_back(idx);
            return inner.nodes[idx].entry.as_ref().map(|e| e.value.clone());
        }

        inner.remove(key);
        let most_recent = inner.nodes[TAIL].prev;
        if most_recent != HEAD {
            let stale = inner.nodes[most_recent]
                .entry
                .as_ref()
                .is_some_and(|e| self.is_expired(e.saved_at, now));
            if stale {
                inner.clear();
            }
        }
        None
    }

    pub(crate) fn save_at(&self, key: K, value: V, now: DateTime<Utc>) {
        if self.max_size == 0 {
            return;
        }

        let mut inner = self.write();
        inner.remove(&key);

        let idx = inner.alloc(Entry {
            key: key.clone(),
            value,
            saved_at: now,
        });
        inner.push_back(idx);
        inner.map.insert(key, idx);

        while inner.map.len() > self.max_size {
            let oldest = inner.nodes[HEAD].next;
            let Some(entry) = inner.release(oldest) else {
                break;
            };
            inner.map.remove(&entry.key);
        }
    }

    /// Keys from least to most recently used.
    #[cfg(test)]
    fn keys(&self) -> Vec<K> {
        let inner = self.inner.read().unwrap();
        let mut keys = Vec::new();
        let mut idx = inner.nodes[HEAD].next;
        while idx != TAIL {
            keys.extend(inner.nodes[idx].entry.as_ref().map(|e| e.key.clone()));
            idx = inner.nodes[idx].next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = LruCache::new(3, Duration::from_secs(1000));
        cache.save(1, 100);
        cache.save(2, 200);
        cache.save(3, 300);
        cache.save(4, 400);

        assert_eq!(cache.keys(), vec![2, 3, 4]);
        assert_eq!(cache.lookup(&1), None);
        assert_eq!(cache.lookup(&2), Some(200));
    }

    #[test]
    fn lookup_promotes_recency() {
        let cache = LruCache::new(3, Duration::from_secs(1000));
        cache.save(1, 100);
        cache.save(2, 200);
        cache.save(3, 300);

        assert_eq!(cache.lookup(&1), Some(100));
        assert_eq!(cache.keys(), vec![2, 3, 1]);

        cache.save(4, 400);
        assert_eq!(cache.keys(), vec![3, 1, 4]);
    }

    #[test]
    fn save_replaces_and_promotes() {
        let cache = LruCache::new(3, Duration::from_secs(1000));
        cache.save(1, 100);
        cache.save(2, 200);
        cache.save(1, 101);

        assert_eq!(cache.keys(), vec![2, 1]);
        assert_eq!(cache.peek(&1), Some(101));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn peek_does_not_promote() {
        let cache = LruCache::new(3, Duration::from_secs(1000));
        cache.save(1, 100);
        cache.save(2, 200);

        assert_eq!(cache.peek(&1), Some(100));
        assert_eq!(cache.keys(), vec![1, 2]);
        assert_eq!(cache.peek(&5), None);
    }

    #[test]
    fn zero_size_disables_cache() {
        let cache = LruCache::new(0, Duration::from_secs(1000));
        cache.save(1, 100);

        assert_eq!(cache.lookup(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entry_is_evicted() {
        let cache = LruCache::new(3, Duration::from_secs(10));
        let now = Utc::now();
        cache.save_at(1, 100, now - TimeDelta::seconds(20));
        cache.save_at(2, 200, now);

        assert_eq!(cache.lookup_at(&1, now), None);
        assert_eq!(cache.keys(), vec![2]);
        assert_eq!(cache.lookup_at(&2, now), Some(200));
    }

    #[test]
    fn cache_is_reset_when_most_recent_entry_is_expired() {
        let cache = LruCache::new(3, Duration::from_secs(10));
        let now = Utc::now();
        cache.save_at(1, 100, now - TimeDelta::seconds(30));
        cache.save_at(2, 200, now - TimeDelta::seconds(20));
        cache.save_at(3, 300, now - TimeDelta::seconds(15));

        assert_eq!(cache.lookup_at(&1, now), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_timeout_never_expires() {
        let cache = LruCache::new(3, Duration::ZERO);
        let now = Utc::now();
        cache.save_at(1, 100, now - TimeDelta::days(365));

        assert_eq!(cache.lookup_at(&1, now), Some(100));
    }

    #[test]
    fn remove_and_reset() {
        let cache = LruCache::new(3, Duration::from_secs(1000));
        cache.save(1, 100);
        cache.save(2, 200);

        assert!(cache.remove(&1));
        assert!(!cache.remove(&1));
        assert_eq!(cache.keys(), vec![2]);

        cache.reset();
        assert!(cache.is_empty());
        cache.save(3, 300);
        assert_eq!(cache.keys(), vec![3]);
    }

    #[test]
    fn slots_are_reused() {
        let cache = LruCache::new(2, Duration::from_secs(1000));
        for i in 0..100 {
            cache.save(i, i);
        }
        assert_eq!(cache.keys(), vec![98, 99]);
        assert!(cache.inner.read().unwrap().nodes.len() <= 5);
    }

    #[test]
    fn concurrent_access() {
        let cache = Arc::new(LruCache::new(100, Duration::from_secs(1000)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        cache.save(t * 1000 + i, i);
                        cache.lookup(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 100);
        assert_eq!(cache.keys().len(), 100);
    }
}
