//! The in-memory cache store

use dashmap::DashMap;

use std::sync::Arc;

use crate::cache::{CacheEntry, CacheEntrySummary, CacheStats, CacheStore};

const STATS_SAMPLE: usize = 10;

/// A bounded in-memory [`CacheStore`] keyed by fingerprint.
///
/// On insertion overflow the entries with the oldest access time are
/// evicted; TTL expiry is applied lazily at lookup and by the sweeper.
pub struct MemoryStore {
    entries: DashMap<String, Arc<CacheEntry>>,
    max_size: usize,
}

impl MemoryStore {
    /// Creates a store bounded to `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
        }
    }

    /// Evicts the least-recently-accessed entries past the bound.
    fn evict_overflow(&self) {
        let overflow = self.entries.len().saturating_sub(self.max_size);
        if overflow == 0 {
            return;
        }
        let mut by_access: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_access()))
            .collect();
        by_access.sort_by_key(|(_, last_access)| *last_access);
        for (key, _) in by_access.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
        tracing::debug!(evicted = overflow, "cache store over capacity");
    }
}

impl CacheStore for MemoryStore {
    fn lookup(&self, key: &str, now: u64) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_expired(now) {
            drop(self.entries.remove(key));
            return None;
        }
        entry.touch(now);
        Some(entry)
    }

    fn store(&self, key: String, entry: CacheEntry) {
        self.entries.insert(key, Arc::new(entry));
        self.evict_overflow();
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn sweep(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.evict_overflow();
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self, now: u64) -> CacheStats {
        let entries = self
            .entries
            .iter()
            .take(STATS_SAMPLE)
            .map(|entry| CacheEntrySummary {
                key: entry.key().clone(),
                size_bytes: entry.value().body.len(),
                expires_in_millis: entry.value().expires_at.saturating_sub(now),
            })
            .collect();
        CacheStats {
            size: self.entries.len(),
            max: self.max_size,
            entries,
        }
    }
}
