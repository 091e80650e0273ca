// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Striped async locks keyed by string (a pointerhash or an owner key).
//!
//! Unrelated keys may share a stripe; that only costs some parallelism.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

/// Number of stripes.
pub const DEFAULT_STRIPES: usize = 64;

pub struct HashLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for HashLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl HashLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(key)].lock().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn same_hash_maps_to_same_stripe() {
        let locks = HashLocks::default();
        assert_eq!(locks.stripe("abc"), locks.stripe("abc"));
        assert!(locks.stripe("abc") < DEFAULT_STRIPES);
    }

    #[tokio::test]
    async fn second_holder_waits() {
        let locks = Arc::new(HashLocks::new(1));
        let guard = locks.lock("h").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("h").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }
}
