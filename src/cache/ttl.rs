//! Bounded, insertion-ordered cache with per-entry expiry.
//!
//! Entries expire once the time since their last `put` exceeds the TTL.
//! When full, the oldest-inserted entry is evicted first; reads do not
//! refresh an entry's position, so this is not an LRU.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct Store<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Insertion sequence -> key; first entry is the oldest
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V> Store<K, V> {
    fn purge_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let expired: Vec<(K, u64)> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.stored_at) > ttl)
            .map(|(key, entry)| (key.clone(), entry.seq))
            .collect();

        for (key, seq) in &expired {
            self.entries.remove(key);
            self.order.remove(seq);
        }
        expired.len()
    }

    fn evict_oldest(&mut self) -> bool {
        match self.order.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }
}

/// Thread-safe TTL cache. Every operation runs under one mutex.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    store: Mutex<Store<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            store: Mutex::new(Store {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or overwrite `key`.
    ///
    /// Expired entries are purged first, then the oldest entries are evicted
    /// while the cache is at capacity. An overwritten key keeps its original
    /// insertion position unless it was itself evicted.
    pub fn put(&self, key: K, value: V) {
        let now = Instant::now();
        let mut store = self.lock();
        store.purge_expired(now, self.ttl);

        while store.entries.len() >= self.capacity {
            if !store.evict_oldest() {
                break;
            }
        }

        let seq = match store.entries.get(&key) {
            Some(existing) => existing.seq,
            None => {
                let seq = store.next_seq;
                store.next_seq += 1;
                store.order.insert(seq, key.clone());
                seq
            }
        };
        store.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                seq,
            },
        );
    }

    /// Value for `key` if present and unexpired. Expired entries are removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut store = self.lock();
        let expired = match store.entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.stored_at) > self.ttl,
        };
        if expired {
            store.remove(key);
            return None;
        }
        store.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of valid entries, after purging expired ones.
    pub fn len(&self) -> usize {
        let mut store = self.lock();
        store.purge_expired(Instant::now(), self.ttl);
        store.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now(), self.ttl)
    }

    /// Snapshot of all valid entries in insertion order.
    pub fn items(&self) -> Vec<(K, V)> {
        let mut store = self.lock();
        store.purge_expired(Instant::now(), self.ttl);
        store
            .order
            .values()
            .filter_map(|key| {
                store
                    .entries
                    .get(key)
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    /// Mutate every valid entry in place.
    ///
    /// Timestamps and insertion order are left untouched.
    pub fn update_all(&self, mut f: impl FnMut(&K, &mut V)) {
        let mut store = self.lock();
        store.purge_expired(Instant::now(), self.ttl);
        for (key, entry) in store.entries.iter_mut() {
            f(key, &mut entry.value);
        }
    }

    pub fn clear(&self) {
        let mut store = self.lock();
        store.entries.clear();
        store.order.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Store<K, V>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(cache: &TtlCache<String, u32>) -> Vec<String> {
        cache.items().into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_evicts_oldest_inserted_at_capacity() {
        let cache = TtlCache::new(3, Duration::from_secs(3600));
        for (i, key) in ["A", "B", "C", "D"].iter().enumerate() {
            cache.put(key.to_string(), i as u32);
            assert!(cache.len() <= 3);
        }
        assert_eq!(keys(&cache), vec!["B", "C", "D"]);
        assert_eq!(cache.get(&"A".to_string()), None);
    }

    #[test]
    fn test_reads_do_not_change_eviction_order() {
        let cache = TtlCache::new(2, Duration::from_secs(3600));
        cache.put("A".to_string(), 1);
        cache.put("B".to_string(), 2);
        assert_eq!(cache.get(&"A".to_string()), Some(1));
        cache.put("C".to_string(), 3);
        assert_eq!(keys(&cache), vec!["B", "C"]);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let cache = TtlCache::new(10, Duration::from_secs(3600));
        cache.put("A".to_string(), 1);
        cache.put("B".to_string(), 2);
        cache.put("A".to_string(), 3);
        assert_eq!(keys(&cache), vec!["A", "B"]);
        assert_eq!(cache.get(&"A".to_string()), Some(3));
    }

    #[test]
    fn test_zero_capacity_keeps_only_newest() {
        let cache = TtlCache::new(0, Duration::from_secs(3600));
        cache.put("A".to_string(), 1);
        cache.put("B".to_string(), 2);
        assert_eq!(keys(&cache), vec!["B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_removes_expired_entry() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.put("A".to_string(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"A".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"A".to_string()), None);
        assert!(!cache.contains(&"A".to_string()));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_measured_from_last_put() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.put("A".to_string(), 1);
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put("A".to_string(), 2);
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"A".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_purges_on_next_access() {
        let cache = TtlCache::new(10, Duration::ZERO);
        cache.put("A".to_string(), 1);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_counts_removed() {
        let cache = TtlCache::new(10, Duration::from_secs(10));
        cache.put("A".to_string(), 1);
        cache.put("B".to_string(), 2);
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.put("C".to_string(), 3);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(keys(&cache), vec!["C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_purges_before_evicting() {
        let cache = TtlCache::new(2, Duration::from_secs(10));
        cache.put("A".to_string(), 1);
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.put("B".to_string(), 2);
        tokio::time::advance(Duration::from_secs(6)).await;

        // A has expired, so B survives the insert of C.
        cache.put("C".to_string(), 3);
        assert_eq!(keys(&cache), vec!["B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_all_keeps_timestamps() {
        let cache = TtlCache::new(10, Duration::from_secs(10));
        cache.put("A".to_string(), 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.update_all(|_, v| *v += 10);
        assert_eq!(cache.get(&"A".to_string()), Some(11));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get(&"A".to_string()), None);
    }

    #[test]
    fn test_clear() {
        let cache = TtlCache::new(10, Duration::from_secs(10));
        cache.put("A".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.items().is_empty());
    }
}
