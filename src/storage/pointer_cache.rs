// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process mirror of the live pointer set.
//!
//! Bulk-loaded at startup and kept in step by the protocol layer on every
//! successful write. With a TTL or entry cap configured it is no longer a
//! full mirror, so callers treat a miss as "ask the database".

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pointer::Pointer;

struct CacheEntry {
    pointer: Pointer,
    touched_at: Instant,
}

/// Pointer cache keyed by id.
pub struct PointerCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// `None` keeps entries forever.
    ttl: Option<Duration>,
    /// `0` means unbounded.
    max_entries: usize,
}

impl PointerCache {
    pub fn new(ttl: Option<Duration>, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Admit every pointer that passes verification. Returns how many did.
    pub fn load(&self, pointers: Vec<Pointer>) -> usize {
        let mut admitted = 0;
        for pointer in pointers {
            if !pointer.verify() {
                warn!(id = %pointer.id, "Stored pointer failed verification, not caching");
                continue;
            }
            if self.add(pointer) {
                admitted += 1;
            }
        }
        admitted
    }

    /// Add or overwrite an entry. Skipped (returns `false`) when full.
    pub fn add(&self, pointer: Pointer) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        if self.max_entries > 0
            && entries.len() >= self.max_entries
            && !entries.contains_key(&pointer.id)
        {
            debug!(id = %pointer.id, "Pointer cache full, skipping");
            return false;
        }
        entries.insert(
            pointer.id.clone(),
            CacheEntry {
                pointer,
                touched_at: Instant::now(),
            },
        );
        true
    }

    /// Get a pointer by id, refreshing its timestamp.
    pub fn get(&self, id: &str) -> Option<Pointer> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get_mut(id)?;
        entry.touched_at = Instant::now();
        Some(entry.pointer.clone())
    }

    /// Linear scan for the owner's pointer to `pointerhash`.
    pub fn find_by_owner_and_hash(&self, pubkey: &str, pointerhash: &str) -> Option<Pointer> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries
            .values_mut()
            .find(|e| e.pointer.pubkey == pubkey && e.pointer.pointerhash == pointerhash)?;
        entry.touched_at = Instant::now();
        Some(entry.pointer.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Pointer> {
        let mut entries = self.entries.lock().ok()?;
        entries.remove(id).map(|e| e.pointer)
    }

    /// Drop entries older than the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.touched_at) <= ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::identity::{public_key_hex, sha256_hex};
    use crate::pointer::PointerFields;

    const SECRET: &str = "981e951a3cdfc221831c10ae63c37b74919f710f686645898335e7d1e6f6581a";

    fn signed(content: &[u8]) -> Pointer {
        PointerFields {
            pubkey: public_key_hex(SECRET).unwrap(),
            timestamp: 1_700_000_000,
            pointerhash: sha256_hex(content),
            size: content.len() as u64,
            nonce: 1,
        }
        .into_signed(SECRET)
        .unwrap()
    }

    #[test]
    fn load_admits_only_verified_pointers() {
        let cache = PointerCache::new(None, 0);
        let good = signed(b"good");
        let mut bad = signed(b"bad");
        bad.nonce = 7;

        assert_eq!(cache.load(vec![good.clone(), bad.clone()]), 1);
        assert!(cache.get(&good.id).is_some());
        assert!(cache.get(&bad.id).is_none());
    }

    #[test]
    fn owner_and_hash_lookup() {
        let cache = PointerCache::new(None, 0);
        let p = signed(b"content");
        cache.add(p.clone());

        assert_eq!(cache.find_by_owner_and_hash(&p.pubkey, &p.pointerhash), Some(p.clone()));
        assert!(cache.find_by_owner_and_hash(&p.pubkey, "other").is_none());

        cache.remove(&p.id);
        assert!(cache.find_by_owner_and_hash(&p.pubkey, &p.pointerhash).is_none());
    }

    #[test]
    fn ttl_sweep_spares_touched_entries() {
        let cache = PointerCache::new(Some(Duration::from_secs(60)), 0);
        let p = signed(b"content");
        cache.add(p.clone());

        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.sweep_at(Instant::now() + Duration::from_secs(61)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache = PointerCache::new(None, 0);
        cache.add(signed(b"content"));
        assert_eq!(cache.sweep_at(Instant::now() + Duration::from_secs(86_400)), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn max_entries_skips_new_additions() {
        let cache = PointerCache::new(None, 1);
        let a = signed(b"a");
        let b = signed(b"b");
        assert!(cache.add(a.clone()));
        assert!(!cache.add(b.clone()));
        // Overwriting an existing entry is still allowed.
        assert!(cache.add(a));
        assert_eq!(cache.len(), 1);
    }
}
