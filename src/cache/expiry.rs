//! Key-to-deadline tracking with an O(log n) expiry scan.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Tracks a deadline per key and drains expired keys in deadline order.
///
/// Re-touching a key moves its deadline; the old queue bucket entry is
/// left behind and skipped during the scan (the `deadlines` map is
/// authoritative).
pub struct ExpirationMap<K> {
    deadlines: HashMap<K, i64>,
    queue: BTreeMap<i64, Vec<K>>,
}

impl<K: Eq + Hash + Clone> ExpirationMap<K> {
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
            queue: BTreeMap::new(),
        }
    }

    /// Set or move a key's deadline.
    pub fn touch(&mut self, key: K, deadline: i64) {
        self.deadlines.insert(key.clone(), deadline);
        self.queue.entry(deadline).or_default().push(key);
    }

    pub fn remove(&mut self, key: &K) -> Option<i64> {
        self.deadlines.remove(key)
    }

    pub fn deadline(&self, key: &K) -> Option<i64> {
        self.deadlines.get(key).copied()
    }

    /// Remove and return every key whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: i64) -> Vec<K> {
        let mut expired = Vec::new();
        while let Some((&deadline, _)) = self.queue.first_key_value() {
            if deadline > now {
                break;
            }
            let (_, keys) = self.queue.pop_first().expect("non-empty first bucket");
            for key in keys {
                // Skip entries superseded by a later touch or removal.
                if self.deadlines.get(&key) == Some(&deadline) {
                    self.deadlines.remove(&key);
                    expired.push(key);
                }
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.queue.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for ExpirationMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_in_order() {
        let mut map = ExpirationMap::new();
        map.touch("a", 10);
        map.touch("b", 5);
        map.touch("c", 20);

        assert!(map.take_expired(4).is_empty());
        assert_eq!(map.take_expired(10), vec!["b", "a"]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.take_expired(100), vec!["c"]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_touch_moves_deadline() {
        let mut map = ExpirationMap::new();
        map.touch("a", 10);
        map.touch("a", 50);

        // The stale bucket at 10 must not yield the key.
        assert!(map.take_expired(10).is_empty());
        assert_eq!(map.deadline(&"a"), Some(50));
        assert_eq!(map.take_expired(50), vec!["a"]);
    }

    #[test]
    fn test_remove_cancels_expiry() {
        let mut map = ExpirationMap::new();
        map.touch("a", 10);
        assert_eq!(map.remove(&"a"), Some(10));
        assert!(map.take_expired(100).is_empty());
    }

    #[test]
    fn test_same_deadline_bucket() {
        let mut map = ExpirationMap::new();
        map.touch("a", 10);
        map.touch("b", 10);
        let mut expired = map.take_expired(10);
        expired.sort();
        assert_eq!(expired, vec!["a", "b"]);
    }
}
