// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Running per-owner totals used for quota checks.

use std::collections::HashMap;
use std::sync::Mutex;

use super::OwnerAggregate;

/// Count and byte sum of one owner's live pointers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub pointer_count: u64,
    pub pointer_hash_sum: u64,
}

#[derive(Default)]
pub struct PointerIndex {
    entries: Mutex<HashMap<String, IndexEntry>>,
}

impl PointerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current totals for `pubkey` (zero when untracked).
    pub fn get(&self, pubkey: &str) -> IndexEntry {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(pubkey).copied())
            .unwrap_or_default()
    }

    /// Apply deltas; the entry disappears once its count reaches zero.
    pub fn update(&self, pubkey: &str, delta_count: i64, delta_size: i64) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let entry = entries.entry(pubkey.to_string()).or_default();
        entry.pointer_count = entry.pointer_count.saturating_add_signed(delta_count);
        entry.pointer_hash_sum = entry.pointer_hash_sum.saturating_add_signed(delta_size);
        if entry.pointer_count == 0 {
            entries.remove(pubkey);
        }
    }

    /// Replace the whole index with fresh aggregates.
    pub fn rehash(&self, totals: Vec<OwnerAggregate>) {
        if let Ok(mut entries) = self.entries.lock() {
            *entries = totals
                .into_iter()
                .filter(|t| t.pointer_count > 0)
                .map(|t| {
                    (
                        t.pubkey,
                        IndexEntry {
                            pointer_count: t.pointer_count,
                            pointer_hash_sum: t.pointer_hash_sum,
                        },
                    )
                })
                .collect();
        }
    }

    /// Number of tracked owners.
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

    #[test]
    fn update_creates_and_accumulates() {
        let index = PointerIndex::new();
        assert_eq!(index.get("alice"), IndexEntry::default());

        index.update("alice", 1, 100);
        index.update("alice", 1, 50);
        assert_eq!(
            index.get("alice"),
            IndexEntry {
                pointer_count: 2,
                pointer_hash_sum: 150
            }
        );
    }

    #[test]
    fn entry_removed_at_zero_count() {
        let index = PointerIndex::new();
        index.update("alice", 1, 100);
        index.update("alice", -1, -100);
        assert!(index.is_empty());
    }

    #[test]
    fn rehash_replaces_everything() {
        let index = PointerIndex::new();
        index.update("stale", 3, 3);
        index.rehash(vec![OwnerAggregate {
            pubkey: "alice".into(),
            pointer_count: 2,
            pointer_hash_sum: 20,
        }]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("stale"), IndexEntry::default());
        assert_eq!(index.get("alice").pointer_hash_sum, 20);
    }
}
