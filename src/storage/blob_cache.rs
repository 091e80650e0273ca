// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Size-bounded TTL cache for blob contents.
//!
//! Entries are kept in insertion order. Reads refresh an entry's timestamp
//! (so the TTL sweep spares it) but never move it in the eviction queue:
//! under size pressure the earliest-inserted blobs go first.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

/// Cached blob bytes + last-touch timestamp.
struct CacheEntry {
    bytes: Vec<u8>,
    touched_at: Instant,
}

struct Inner {
    // Only `put`/`pop_lru`/`peek*` are used, so LRU order == insertion order.
    entries: LruCache<String, CacheEntry>,
    total_bytes: usize,
}

/// In-process blob cache keyed by content hash.
pub struct BlobCache {
    inner: Mutex<Inner>,
    size_limit: usize,
    ttl: Duration,
}

impl BlobCache {
    /// Create a cache holding at most `size_limit` bytes, each entry living
    /// `ttl` past its last touch.
    pub fn new(size_limit: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            size_limit,
            ttl,
        }
    }

    /// Get a copy of the cached bytes, refreshing the entry's timestamp.
    pub fn get(&self, hash: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().ok()?;
        let entry = inner.entries.peek_mut(hash)?;
        entry.touched_at = Instant::now();
        Some(entry.bytes.clone())
    }

    /// Admit `bytes` under `hash`.
    ///
    /// Returns `false` when the item alone is larger than the whole cache.
    /// Re-inserting a cached hash only refreshes its timestamp.
    pub fn insert(&self, hash: &str, bytes: &[u8]) -> bool {
        if bytes.len() > self.size_limit {
            debug!(hash, size = bytes.len(), "Blob too large for cache, skipping");
            return false;
        }

        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };

        if let Some(entry) = inner.entries.peek_mut(hash) {
            entry.touched_at = Instant::now();
            return true;
        }

        let mut evicted = 0usize;
        while inner.total_bytes + bytes.len() > self.size_limit {
            match inner.entries.pop_lru() {
                Some((_, victim)) => {
                    inner.total_bytes -= victim.bytes.len();
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(evicted, "Evicted blobs to admit new entry");
        }

        inner.total_bytes += bytes.len();
        inner.entries.put(
            hash.to_string(),
            CacheEntry {
                bytes: bytes.to_vec(),
                touched_at: Instant::now(),
            },
        );
        true
    }

    /// Drop a cached blob (explicit delete).
    pub fn remove(&self, hash: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(entry) = inner.entries.pop(hash) {
                inner.total_bytes -= entry.bytes.len();
            }
        }
    }

    /// Remove entries not touched within the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.touched_at) > self.ttl)
            .map(|(hash, _)| hash.clone())
            .collect();

        for hash in &expired {
            if let Some(entry) = inner.entries.pop(hash) {
                inner.total_bytes -= entry.bytes.len();
            }
        }
        expired.len()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.entries.contains(hash))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().map(|inner| inner.total_bytes).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let cache = BlobCache::new(100, Duration::from_secs(300));
        assert!(cache.get("a").is_none());

        assert!(cache.insert("a", b"hello"));
        assert_eq!(cache.get("a").unwrap(), b"hello");
        assert_eq!(cache.total_bytes(), 5);
    }

    #[test]
    fn oversized_item_is_rejected() {
        let cache = BlobCache::new(4, Duration::from_secs(300));
        assert!(!cache.insert("a", b"hello"));
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_follows_insertion_order_not_reads() {
        let cache = BlobCache::new(30, Duration::from_secs(300));
        cache.insert("first", &[1u8; 10]);
        cache.insert("second", &[2u8; 10]);
        cache.insert("third", &[3u8; 10]);

        // Reading the oldest entry must not protect it from size eviction.
        assert!(cache.get("first").is_some());

        cache.insert("fourth", &[4u8; 15]);
        assert!(!cache.contains("first"));
        assert!(!cache.contains("second"));
        assert!(cache.contains("third"));
        assert!(cache.contains("fourth"));
        assert_eq!(cache.total_bytes(), 25);
    }

    #[test]
    fn reinsert_does_not_duplicate_bytes() {
        let cache = BlobCache::new(100, Duration::from_secs(300));
        cache.insert("a", &[0u8; 10]);
        cache.insert("a", &[0u8; 10]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 10);
    }

    #[test]
    fn sweep_removes_untouched_entries() {
        let cache = BlobCache::new(100, Duration::from_secs(60));
        cache.insert("a", b"aa");
        cache.insert("b", b"bb");

        assert_eq!(cache.sweep(), 0);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.sweep_at(later), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn remove_frees_bytes() {
        let cache = BlobCache::new(100, Duration::from_secs(60));
        cache.insert("a", b"abc");
        cache.remove("a");
        cache.remove("a");
        assert_eq!(cache.total_bytes(), 0);
        assert!(cache.get("a").is_none());
    }
}
