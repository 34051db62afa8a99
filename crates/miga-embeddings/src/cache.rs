//! In-memory embedding cache, bounded by entry count with per-entry TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    vector: Vec<f32>,
    expires_at: Instant,
}

/// Count-bounded TTL cache keyed by the 64-bit content hash. When full,
/// roughly the oldest 10% of entries (by expiry) are evicted in one pass.
pub struct EmbeddingCache {
    entries: Mutex<HashMap<u64, Entry>>,
    max_entries: usize,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: u64) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.vector.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: u64, vector: Vec<f32>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries {
            Self::evict_oldest(&mut entries, self.max_entries / 10 + 1);
        }
        entries.insert(
            key,
            Entry {
                vector,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_oldest(entries: &mut HashMap<u64, Entry>, count: usize) {
        let mut by_expiry: Vec<(u64, Instant)> = entries
            .iter()
            .map(|(k, v)| (*k, v.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, exp)| *exp);
        for (key, _) in by_expiry.into_iter().take(count) {
            entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_expiry() {
        let cache = EmbeddingCache::new(8, Duration::from_millis(10));
        cache.insert(1, vec![0.5, 0.5]);
        assert_eq!(cache.get(1), Some(vec![0.5, 0.5]));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_a_tenth() {
        let cache = EmbeddingCache::new(100, Duration::from_secs(60));
        for i in 0..100u64 {
            cache.insert(i, vec![i as f32]);
        }
        assert_eq!(cache.len(), 100);
        cache.insert(100, vec![100.0]);
        // 11 oldest evicted (100/10 + 1), then one inserted
        assert_eq!(cache.len(), 90);
        assert!(cache.get(100).is_some());
    }
}
