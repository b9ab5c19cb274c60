//! In-process LRU tier bounded by entry count and aggregate weight.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Values that report an approximate cost for the aggregate bound.
pub trait Weighted {
    /// Cost of the value in bytes (estimated).
    fn weight(&self) -> usize;
}

/// LRU map keyed by string, evicting least recently used entries when either
/// the entry count or the summed [`Weighted::weight`] exceeds its limit.
#[derive(Debug)]
pub struct BoundedLru<V> {
    entries: LruCache<String, V>,
    weight: usize,
    max_weight: usize,
}

impl<V: Weighted> BoundedLru<V> {
    /// Create a tier holding at most `max_entries` values totalling at most
    /// `max_weight`.
    #[must_use]
    pub fn new(max_entries: usize, max_weight: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            weight: 0,
            max_weight,
        }
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Look up `key` without touching recency.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.peek(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Insert or replace `key`, returning how many other entries were evicted
    /// to honour the bounds.
    pub fn insert(&mut self, key: String, value: V) -> usize {
        let mut evicted = 0;
        let added = value.weight();
        if let Some((old_key, old)) = self.entries.push(key.clone(), value) {
            self.weight = self.weight.saturating_sub(old.weight());
            if old_key != key {
                evicted += 1;
            }
        }
        self.weight = self.weight.saturating_add(added);

        while self.weight > self.max_weight {
            let Some((_, dropped)) = self.entries.pop_lru() else {
                break;
            };
            self.weight = self.weight.saturating_sub(dropped.weight());
            evicted += 1;
        }
        evicted
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.entries.pop(key)?;
        self.weight = self.weight.saturating_sub(removed.weight());
        Some(removed)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, value)| !keep(key.as_str(), value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    /// Iterate from most to least recently used without touching recency.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.weight = 0;
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summed weight of all entries.
    #[must_use]
    pub const fn weight(&self) -> usize {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Weighted for Vec<u8> {
        fn weight(&self) -> usize {
            self.len()
        }
    }

    #[test]
    fn count_bound_evicts_least_recently_used() {
        let mut tier = BoundedLru::new(2, usize::MAX);
        tier.insert("a".into(), vec![1]);
        tier.insert("b".into(), vec![2]);
        assert!(tier.get("a").is_some());

        let evicted = tier.insert("c".into(), vec![3]);
        assert_eq!(evicted, 1);
        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[test]
    fn weight_bound_evicts_until_within_limit() {
        let mut tier = BoundedLru::new(10, 10);
        tier.insert("a".into(), vec![0; 4]);
        tier.insert("b".into(), vec![0; 4]);
        let evicted = tier.insert("c".into(), vec![0; 4]);

        assert_eq!(evicted, 1);
        assert_eq!(tier.weight(), 8);
        assert!(!tier.contains("a"));
    }

    #[test]
    fn replacing_a_key_adjusts_weight() {
        let mut tier = BoundedLru::new(10, 100);
        tier.insert("a".into(), vec![0; 10]);
        let evicted = tier.insert("a".into(), vec![0; 3]);
        assert_eq!(evicted, 0);
        assert_eq!(tier.weight(), 3);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn retain_drops_matching_entries() {
        let mut tier = BoundedLru::new(10, 100);
        tier.insert("repo:a".into(), vec![0; 2]);
        tier.insert("repo2:a".into(), vec![0; 2]);
        tier.retain(|key, _| !key.starts_with("repo:"));

        assert_eq!(tier.len(), 1);
        assert!(tier.contains("repo2:a"));
        assert_eq!(tier.weight(), 2);
    }
}
