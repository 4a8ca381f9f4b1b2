// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use cached::{Cached, SizedCache};
use scc::HashMap as SccHashMap;
use scc::hash_map::Entry;
use std::hash::Hash;
use std::sync::Mutex;

pub trait KeyValueCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn put(&self, key: K, value: V);

    fn remove(&self, key: &K) -> Option<V>;
}

/// What a `compute` closure wants done with the entry it was shown.
pub enum CacheWrite<V> {
    Keep,
    Put(V),
    Remove,
}

/// Unbounded concurrent map for small, long lived state.
/// Entries for different keys never contend on the same lock.
pub struct ConcurrentCache<K: Eq + Hash, V> {
    map: SccHashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for ConcurrentCache<K, V> {
    fn default() -> Self {
        Self {
            map: SccHashMap::new(),
        }
    }
}

impl<K, V> ConcurrentCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-modify-write of one key while holding that key's bucket lock.
    /// The closure must not touch this cache.
    pub fn compute<R>(&self, key: K, f: impl FnOnce(Option<&V>) -> (CacheWrite<V>, R)) -> R {
        match self.map.entry(key) {
            Entry::Occupied(mut occupied) => {
                let (write, result) = f(Some(occupied.get()));

                match write {
                    CacheWrite::Keep => {}
                    CacheWrite::Put(value) => *occupied.get_mut() = value,
                    CacheWrite::Remove => {
                        let _ = occupied.remove();
                    }
                }

                result
            }
            Entry::Vacant(vacant) => {
                let (write, result) = f(None);

                if let CacheWrite::Put(value) = write {
                    let _ = vacant.insert_entry(value);
                }

                result
            }
        }
    }

    /// Owned copy of every entry matching `filter`, safe to iterate while
    /// other threads keep writing.
    pub fn snapshot(&self, mut filter: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)> {
        let mut entries = Vec::new();

        self.map.scan(|key, value| {
            if filter(key, value) {
                entries.push((key.clone(), value.clone()));
            }
        });

        entries
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Borrows the value for `key` without cloning it.
    pub fn read<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.map.read(key, |_, value| f(value))
    }

    /// Drops entries for which `keep` returns false. `keep` may trim the
    /// value in place.
    pub fn retain(&self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        self.map.retain(|key, value| keep(key, value));
    }
}

impl<K, V> KeyValueCache<K, V> for ConcurrentCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.map.read(key, |_, value| value.clone())
    }

    fn put(&self, key: K, value: V) {
        self.compute(key, |_| (CacheWrite::Put(value), ()));
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }
}

/// Capacity bounded cache, least recently used entries are evicted first.
pub struct BoundedCache<K: Eq + Hash + Clone, V> {
    inner: Mutex<SizedCache<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SizedCache::with_size(capacity.max(1))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SizedCache<K, V>> {
        // a panicking writer cannot leave SizedCache half updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().cache_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `f` to the value stored for `key`, inserting `default()` first
    /// when absent.
    pub fn update(&self, key: K, default: impl FnOnce() -> V, f: impl FnOnce(&mut V)) {
        let mut cache = self.lock();

        let mut value = cache.cache_remove(&key).unwrap_or_else(default);
        f(&mut value);
        cache.cache_set(key, value);
    }

    pub fn values(&self) -> Vec<V> {
        self.lock().value_order().cloned().collect()
    }
}

impl<K, V> KeyValueCache<K, V> for BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.lock().cache_get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.lock().cache_set(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.lock().cache_remove(key)
    }
}
