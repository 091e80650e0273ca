// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cache Sweeper
//!
//! Background task that expires idle entries from the blob cache and the
//! pointer cache. Both caches refresh an entry's timestamp on access, so only
//! entries untouched for a full TTL are dropped.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`, the same as the server's
//! graceful shutdown path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::storage::{BlobCache, PointerCache};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub struct Sweeper {
    blob_cache: Option<Arc<BlobCache>>,
    pointer_cache: Arc<PointerCache>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(blob_cache: Option<Arc<BlobCache>>, pointer_cache: Arc<PointerCache>) -> Self {
        Self {
            blob_cache,
            pointer_cache,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Cache sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Cache sweeper shutting down");
                return;
            }

            self.sweep_step();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Cache sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over both caches. Returns `(blobs, pointers)` evicted.
    pub fn sweep_step(&self) -> (usize, usize) {
        let blobs = self.blob_cache.as_ref().map_or(0, |c| c.sweep());
        let pointers = self.pointer_cache.sweep();

        if blobs > 0 || pointers > 0 {
            debug!(blobs, pointers, "Cache sweeper: expired idle entries");
        }
        (blobs, pointers)
    }
}
