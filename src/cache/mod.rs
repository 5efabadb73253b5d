//! Load-through cache with batched eviction.
//!
//! Every access resets a key's expiry to `now + retention`. Expired
//! entries are not handed back one by one; they accumulate in a
//! pending batch that `sweep` returns once it reaches a maximum size
//! or a maximum delay. The caller persists the returned batch after
//! releasing whatever lock guards the cache, so readers are never
//! stalled behind the (typically expensive) write.

mod expiry;

pub use expiry::ExpirationMap;

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

pub type LoaderFn<K, V> = Box<dyn FnMut(&K) -> V + Send>;

pub struct BatchedCache<K, V> {
    map: HashMap<K, V>,
    expiry: ExpirationMap<K>,
    retention_ms: i64,
    max_batch_size: usize,
    max_batch_delay_ms: i64,
    /// Evicted entries waiting to be handed back.
    pending: Vec<(K, V)>,
    /// When the oldest pending entry was queued.
    pending_since: Option<i64>,
    loader: LoaderFn<K, V>,
}

impl<K, V> BatchedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(
        retention: Duration,
        max_batch_size: usize,
        max_batch_delay: Duration,
        loader: LoaderFn<K, V>,
    ) -> Self {
        Self {
            map: HashMap::new(),
            expiry: ExpirationMap::new(),
            retention_ms: retention.as_millis() as i64,
            max_batch_size: max_batch_size.max(1),
            max_batch_delay_ms: max_batch_delay.as_millis() as i64,
            pending: Vec::new(),
            pending_since: None,
            loader,
        }
    }

    /// Get a value, loading it on a miss. Refreshes expiry.
    ///
    /// A key that was already queued for eviction is recovered from
    /// the pending batch rather than re-loaded, but its queued entry
    /// is still handed back for persistence (fewer writes beat perfect
    /// reactivity; the consumer must tolerate a stale entry).
    pub fn get(&mut self, key: &K, now: i64) -> &V {
        if !self.map.contains_key(key) {
            let value = match self.pending.iter().find(|(k, _)| k == key) {
                Some((_, v)) => v.clone(),
                None => (self.loader)(key),
            };
            self.map.insert(key.clone(), value);
        }
        self.expiry.touch(key.clone(), now + self.retention_ms);
        self.map.get(key).expect("inserted above")
    }

    /// Get without triggering a load. A hit still refreshes expiry.
    pub fn get_if_present(&mut self, key: &K, now: i64) -> Option<&V> {
        if self.map.contains_key(key) {
            self.expiry.touch(key.clone(), now + self.retention_ms);
        }
        self.map.get(key)
    }

    pub fn put(&mut self, key: K, value: V, now: i64) {
        self.expiry.touch(key.clone(), now + self.retention_ms);
        self.map.insert(key, value);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.expiry.remove(key);
        self.map.remove(key)
    }

    /// Push an entry straight into the eviction batch without it ever
    /// living in the map. Used to route tombstones through the same
    /// persistence path as ordinary evictions.
    pub fn queue_eviction(&mut self, key: K, value: V, now: i64) {
        if self.pending.is_empty() {
            self.pending_since = Some(now);
        }
        self.pending.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Collect expired entries into the pending batch. Returns the
    /// batch for the caller to persist once it is full or overdue,
    /// otherwise an empty vec.
    pub fn sweep(&mut self, now: i64) -> Vec<(K, V)> {
        for key in self.expiry.take_expired(now) {
            if let Some(value) = self.map.remove(&key) {
                if self.pending.is_empty() {
                    self.pending_since = Some(now);
                }
                self.pending.push((key, value));
            }
        }

        let overdue = self
            .pending_since
            .is_some_and(|since| now - since >= self.max_batch_delay_ms);
        if self.pending.len() >= self.max_batch_size || (overdue && !self.pending.is_empty()) {
            self.pending_since = None;
            return std::mem::take(&mut self.pending);
        }
        Vec::new()
    }

    /// Drain everything, bypassing batching. The caller persists the
    /// returned entries; used at shutdown.
    pub fn invalidate_all(&mut self) -> Vec<(K, V)> {
        self.expiry.clear();
        let mut batch = std::mem::take(&mut self.pending);
        self.pending_since = None;
        batch.extend(self.map.drain());
        batch
    }
}
