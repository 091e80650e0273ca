// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state of the relay: content-addressed blob files and the
//! embedded pointer database, each fronted by an in-process cache.
//!
//! ## Storage Layout
//!
//! ```text
//! data/
//!   blobs/
//!     {pointerhash}.blob   # one file per unique blob
//!   pointers.redb          # pointer rows + owner/hash index + hash refcounts
//! ```
//!
//! ## Blocking I/O
//!
//! The blob store and the database are synchronous. Reads go through
//! [`run_bounded`], which moves the work onto the blocking pool and gives up
//! after a deadline so a stalled disk never hangs a request.
//!
//! Writes go through [`run_settled`] instead. The caller always waits for the
//! write to finish, and the write itself checks a [`Deadline`] right before it
//! commits, rolling back once the deadline has passed. A write reported as
//! timed out has therefore not landed, and never lands later.

pub mod blob_cache;
pub mod blob_store;
pub mod paths;
pub mod pointer_cache;
pub mod pointer_db;
pub mod pointer_index;
pub mod pointer_store;
pub mod query;

use std::time::{Duration, Instant};

pub use blob_cache::BlobCache;
pub use blob_store::{BlobError, BlobStore};
pub use paths::StoragePaths;
pub use pointer_cache::PointerCache;
pub use pointer_db::{OwnerAggregate, PointerDb, PointerDbError};
pub use pointer_index::{IndexEntry, PointerIndex};
pub use pointer_store::{PointerStore, StoreError};
pub use query::{PointerQuery, QueryCriteria, QueryError};

/// Blocking work did not finish in time or its worker died.
#[derive(Debug, thiserror::Error)]
pub enum Unavailable {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("worker failed: {0}")]
    Worker(String),
}

/// Latest instant at which a write may still commit.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Duration,
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self {
            limit,
            at: Instant::now().checked_add(limit),
        }
    }

    /// A deadline that never passes.
    pub fn none() -> Self {
        Self {
            limit: Duration::MAX,
            at: None,
        }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// `Err(TimedOut)` once the deadline has passed.
    pub fn check(&self) -> Result<(), Unavailable> {
        if self.expired() {
            Err(Unavailable::TimedOut(self.limit))
        } else {
            Ok(())
        }
    }
}

/// Run a blocking write on the blocking pool and wait until it has finished.
///
/// The work receives a [`Deadline`] `limit` from now and must roll back
/// instead of committing once it has passed. Only a dead worker is reported
/// here; a missed deadline comes back through the work's own result.
pub async fn run_settled<T, F>(limit: Duration, work: F) -> Result<T, Unavailable>
where
    F: FnOnce(Deadline) -> T + Send + 'static,
    T: Send + 'static,
{
    let deadline = Deadline::after(limit);
    tokio::task::spawn_blocking(move || work(deadline))
        .await
        .map_err(|e| Unavailable::Worker(e.to_string()))
}

/// Run blocking reads on the blocking pool, bounded by `limit`.
///
/// On timeout the work keeps running to completion in the background; the
/// caller just stops waiting for it. Only use this for work whose late
/// completion changes nothing another request can observe.
pub async fn run_bounded<T, F>(limit: Duration, work: F) -> Result<T, Unavailable>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Unavailable::Worker(e.to_string())),
        Err(_) => Err(Unavailable::TimedOut(limit)),
    }
}
