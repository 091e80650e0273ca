// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Async, deadline-bounded access to the pointer database.
//!
//! Each call borrows the database for exactly one operation on the blocking
//! pool. Nothing is held across an await of another subsystem.
//!
//! Reads stop waiting at the deadline. Writes are always waited for and roll
//! back if they reach the commit after the deadline, so an `Unavailable` write
//! has not changed anything.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::pointer_db::PointerDbResult;
use super::{
    run_bounded, run_settled, Deadline, OwnerAggregate, PointerDb, PointerDbError, PointerQuery,
    Unavailable,
};
use crate::pointer::Pointer;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] PointerDbError),

    #[error("pointer database unavailable: {0}")]
    Unavailable(#[from] Unavailable),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to the pointer database.
#[derive(Clone)]
pub struct PointerStore {
    db: Arc<PointerDb>,
    timeout: Duration,
}

impl PointerStore {
    pub fn new(db: PointerDb, timeout: Duration) -> Self {
        Self {
            db: Arc::new(db),
            timeout,
        }
    }

    /// Open the database file and wrap it.
    pub fn open(path: &Path, timeout: Duration) -> PointerDbResult<Self> {
        Ok(Self::new(PointerDb::open(path)?, timeout))
    }

    async fn call<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&PointerDb) -> PointerDbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = run_bounded(self.timeout, move || op(&db)).await?;
        Ok(result?)
    }

    async fn write<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&PointerDb, Deadline) -> PointerDbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        match run_settled(self.timeout, move |deadline| op(&db, deadline)).await? {
            Ok(value) => Ok(value),
            Err(PointerDbError::Expired(e)) => Err(StoreError::Unavailable(e)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn check(&self) -> StoreResult<()> {
        self.call(|db| db.check()).await
    }

    pub async fn insert(&self, pointer: Pointer) -> StoreResult<()> {
        self.write(move |db, deadline| db.insert(&pointer, deadline)).await
    }

    pub async fn replace(&self, old_id: String, pointer: Pointer) -> StoreResult<Pointer> {
        self.write(move |db, deadline| db.replace(&old_id, &pointer, deadline)).await
    }

    pub async fn delete(&self, id: String) -> StoreResult<(Pointer, bool)> {
        self.write(move |db, deadline| db.delete(&id, deadline)).await
    }

    pub async fn get(&self, id: String) -> StoreResult<Option<Pointer>> {
        self.call(move |db| db.get(&id)).await
    }

    pub async fn find_by_owner_and_hash(
        &self,
        pubkey: String,
        pointerhash: String,
    ) -> StoreResult<Option<Pointer>> {
        self.call(move |db| db.find_by_owner_and_hash(&pubkey, &pointerhash))
            .await
    }

    pub async fn references(&self, pointerhash: String) -> StoreResult<u64> {
        self.call(move |db| db.references(&pointerhash)).await
    }

    pub async fn query(&self, query: PointerQuery) -> StoreResult<Vec<Pointer>> {
        self.call(move |db| db.query(&query)).await
    }

    pub async fn all_pointers(&self) -> StoreResult<Vec<Pointer>> {
        self.call(|db| db.all_pointers()).await
    }

    pub async fn aggregate_by_owner(&self) -> StoreResult<Vec<OwnerAggregate>> {
        self.call(|db| db.aggregate_by_owner()).await
    }

    /// Hold the database write lock from a background thread for `hold`.
    ///
    /// Returns once the lock is held.
    #[cfg(test)]
    pub(crate) fn stall_writes(&self, hold: Duration) -> std::thread::JoinHandle<()> {
        let db = Arc::clone(&self.db);
        let (taken_tx, taken_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || db.stall_writer(hold, taken_tx));
        taken_rx.recv().unwrap();
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(id: &str) -> Pointer {
        Pointer {
            id: id.into(),
            pubkey: "alice".into(),
            timestamp: 1,
            pointerhash: format!("hash-{id}"),
            size: 4,
            nonce: 0,
            signature: "sig".into(),
        }
    }

    #[tokio::test]
    async fn async_calls_reach_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            PointerStore::open(&dir.path().join("p.redb"), Duration::from_secs(5)).unwrap();

        store.insert(pointer("a")).await.unwrap();
        store.insert(pointer("b")).await.unwrap();
        store.check().await.unwrap();

        assert_eq!(store.get("a".into()).await.unwrap().unwrap().id, "a");
        assert_eq!(store.all_pointers().await.unwrap().len(), 2);
        assert_eq!(store.aggregate_by_owner().await.unwrap()[0].pointer_count, 2);

        let (removed, orphaned) = store.delete("a".into()).await.unwrap();
        assert_eq!(removed.id, "a");
        assert!(orphaned);
    }

    #[tokio::test]
    async fn database_errors_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            PointerStore::open(&dir.path().join("p.redb"), Duration::from_secs(5)).unwrap();

        let err = store.delete("missing".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Db(PointerDbError::NotFound(_))));
    }

    #[tokio::test]
    async fn stalled_write_reports_unavailable_and_never_lands() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            PointerStore::open(&dir.path().join("p.redb"), Duration::from_millis(50)).unwrap();
        store.insert(pointer("a")).await.unwrap();

        let stall = store.stall_writes(Duration::from_millis(300));
        let err = store.insert(pointer("b")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(Unavailable::TimedOut(_))));
        stall.join().unwrap();

        let stall = store.stall_writes(Duration::from_millis(300));
        let err = store.delete("a".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(Unavailable::TimedOut(_))));
        stall.join().unwrap();

        // Reads are not blocked by the writer and see the rolled back state.
        assert!(store.get("b".into()).await.unwrap().is_none());
        assert!(store.get("a".into()).await.unwrap().is_some());
        assert_eq!(store.references("hash-b".into()).await.unwrap(), 0);

        // Once the lock is free the same writes go through.
        store.insert(pointer("b")).await.unwrap();
        store.delete("a".into()).await.unwrap();
        assert_eq!(store.all_pointers().await.unwrap().len(), 1);
    }
}
