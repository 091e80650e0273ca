// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pointer Protocol
//!
//! Publish, replace and delete, plus the two read paths the dispatcher needs.
//!
//! ## Request Flow
//!
//! ```text
//! Received → Verified → Authorized → Resolved{New|Replace|Delete}
//!          → Persisted → CacheSynced → Acknowledged
//! ```
//!
//! Any gate may reject with a [`RelayError`]. Each gate is a plain function
//! returning `Result`, so the sequence reads top to bottom.
//!
//! ## Locking
//!
//! - Publish holds the owner stripe from the quota check until the index is
//!   updated, so concurrent publishes by one key cannot both slip under a
//!   quota.
//! - Publish, replace and delete hold the pointerhash stripe from the owner
//!   lookup until database, blob store and caches agree again. This is what
//!   keeps a delete from removing a blob a concurrent publish still needs.
//!
//! Owner stripes are always taken before hash stripes.
//!
//! Every database and blob write is awaited to completion while the stripes
//! are held. A write that misses its deadline rolls back and surfaces as
//! `StorageUnavailable`, so caches and index only follow writes that landed.

pub mod locks;

use std::sync::Arc;
use std::time::Duration;

use base64ct::{Base64, Encoding};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::filter::{Action, FilterDecision, KeyFilter};
use crate::pointer::identity::sha256_hex;
use crate::pointer::{is_hex_digest, Pointer, PointerDraft};
use crate::storage::blob_store::BlobResult;
use crate::storage::{
    run_bounded, run_settled, BlobError, BlobStore, Deadline, PointerCache, PointerDbError,
    PointerIndex, PointerStore, QueryCriteria, StoreError, Unavailable,
};

pub use locks::HashLocks;

/// Deletion claims older or newer than this (seconds) are refused.
pub const DELETION_WINDOW_SECS: u64 = 300;

/// Deletion claims must use a nonce below this.
pub const DELETION_NONCE_LIMIT: u64 = 9;

/// Knobs the protocol layer reads from configuration.
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    /// Allowed clock skew for published pointers, `0` disables the check.
    pub timestamp_delta: u64,
    /// Largest blob accepted, in bytes.
    pub data_block_limit: usize,
    /// Deadline for each blob I/O call.
    pub blob_timeout: Duration,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            timestamp_delta: 0,
            data_block_limit: 512_000,
            blob_timeout: Duration::from_secs(10),
        }
    }
}

/// What startup loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupSummary {
    pub cached_pointers: usize,
    pub indexed_keys: usize,
}

/// Current unix time in seconds.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn well_formed(pointer: &Pointer) -> bool {
    is_hex_digest(&pointer.id)
        && is_hex_digest(&pointer.pubkey)
        && is_hex_digest(&pointer.pointerhash)
        && pointer.signature.len() == 128
        && pointer
            .signature
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Turn a draft into a well-formed pointer whose signature checks out.
pub fn verified(draft: PointerDraft) -> RelayResult<Pointer> {
    let context = draft.context_id().to_string();
    let pointer = draft
        .into_pointer()
        .filter(well_formed)
        .ok_or_else(|| RelayError::invalid_pointer(context, "Pointer object malformed"))?;

    if !pointer.verify() {
        return Err(RelayError::invalid_pointer(
            &pointer.id,
            "Pointer verification failed",
        ));
    }
    Ok(pointer)
}

/// Anti-replay gate for deletion claims.
///
/// The claim must be strictly newer than the stored pointer, carry a
/// different nonce, be fresh, and use a small nonce.
pub fn check_deletion_claim(claim: &Pointer, stored: &Pointer, now: i64) -> RelayResult<()> {
    let reject = |message: &str| {
        Err(RelayError::new(
            ErrorKind::InvalidDeletionPointer,
            &claim.id,
            message,
        ))
    };

    if claim.timestamp <= stored.timestamp {
        return reject("Claim timestamp must be newer than the stored pointer");
    }
    if claim.nonce == stored.nonce {
        return reject("Claim nonce must differ from the stored pointer");
    }
    if now.abs_diff(claim.timestamp) > DELETION_WINDOW_SECS {
        return reject("Claim timestamp is outside the deletion window");
    }
    if claim.nonce >= DELETION_NONCE_LIMIT {
        return reject("Claim nonce is out of range");
    }
    Ok(())
}

/// Orchestrates identity, filter, database, blob store and caches.
pub struct PointerService {
    store: PointerStore,
    blobs: BlobStore,
    cache: Arc<PointerCache>,
    index: Arc<PointerIndex>,
    filter: KeyFilter,
    owner_locks: HashLocks,
    hash_locks: HashLocks,
    settings: ProtocolSettings,
}

impl PointerService {
    pub fn new(
        store: PointerStore,
        blobs: BlobStore,
        cache: Arc<PointerCache>,
        index: Arc<PointerIndex>,
        filter: KeyFilter,
        settings: ProtocolSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            cache,
            index,
            filter,
            owner_locks: HashLocks::default(),
            hash_locks: HashLocks::default(),
            settings,
        }
    }

    pub fn store(&self) -> &PointerStore {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn pointer_cache(&self) -> &Arc<PointerCache> {
        &self.cache
    }

    pub fn pointer_index(&self) -> &Arc<PointerIndex> {
        &self.index
    }

    /// Prepare blob storage, fill the pointer cache and rebuild the index.
    pub async fn initialize(&self) -> RelayResult<StartupSummary> {
        self.blob_call("", |blobs| blobs.initialize())
            .await?
            .map_err(|e| RelayError::storage_unavailable("", e.to_string()))?;

        let pointers = self
            .store
            .all_pointers()
            .await
            .map_err(|e| store_error("", e))?;
        let cached_pointers = self.cache.load(pointers);

        self.rehash().await?;

        Ok(StartupSummary {
            cached_pointers,
            indexed_keys: self.index.len(),
        })
    }

    /// Write-read-delete check of the blob directory.
    pub async fn check_blob_store(&self) -> RelayResult<()> {
        self.blob_call("", |blobs| blobs.health_check())
            .await?
            .map_err(|e| RelayError::storage_unavailable("", e.to_string()))
    }

    /// Rebuild the quota index from the database.
    pub async fn rehash(&self) -> RelayResult<()> {
        let totals = self
            .store
            .aggregate_by_owner()
            .await
            .map_err(|e| store_error("", e))?;
        self.index.rehash(totals);
        Ok(())
    }

    // =========================================================================
    // Publish
    // =========================================================================

    /// Publish a pointer, storing `blob` (base64) if the claim is new.
    ///
    /// Returns `(id, pointerhash)`. If the owner already holds a pointer for
    /// the same hash, the request becomes a replace of that pointer.
    pub async fn publish(
        &self,
        draft: PointerDraft,
        blob: Option<String>,
    ) -> RelayResult<(String, String)> {
        let pointer = verified(draft)?;
        let _owner = self.owner_locks.lock(&pointer.pubkey).await;

        self.authorize(&pointer, Action::Publish)?;

        if self.settings.timestamp_delta != 0
            && now().abs_diff(pointer.timestamp) > self.settings.timestamp_delta
        {
            return Err(RelayError::invalid_pointer(
                &pointer.id,
                "Pointer timestamp is not within threshold",
            ));
        }

        if self.lookup_id(&pointer.id).await?.is_some() {
            return Err(RelayError::notice(&pointer.id, "Duplicate pointer, ignoring"));
        }

        let _hash = self.hash_locks.lock(&pointer.pointerhash).await;

        if let Some(existing) = self
            .lookup_owner_hash(&pointer.id, &pointer.pubkey, &pointer.pointerhash)
            .await?
        {
            self.authorize(&pointer, Action::Replace)?;
            return self.replace_locked(&existing.id, pointer).await;
        }

        let bytes = self.decode_blob(&pointer, blob)?;

        let id = pointer.id.clone();
        let written = self
            .blob_write(&id, move |blobs, deadline| blobs.put(&bytes, deadline))
            .await?
            .map_err(|e| {
                warn!(id = %id, error = %e, "Failed to write blob");
                RelayError::storage_unavailable(&id, "Critical error saving data")
            })?;
        debug_assert_eq!(written, pointer.pointerhash);

        if let Err(e) = self.store.insert(pointer.clone()).await {
            // A dead worker leaves the insert's outcome unknown; keep the blob.
            if !matches!(e, StoreError::Unavailable(Unavailable::Worker(_))) {
                self.discard_unreferenced_blob(&pointer.pointerhash).await;
            }
            return Err(insert_error(&pointer.id, e));
        }

        self.index
            .update(&pointer.pubkey, 1, i64::try_from(pointer.size).unwrap_or(i64::MAX));
        self.cache.add(pointer.clone());

        info!(
            id = %pointer.id,
            pubkey = %pointer.pubkey,
            pointerhash = %pointer.pointerhash,
            size = pointer.size,
            "Published pointer"
        );
        Ok((pointer.id, pointer.pointerhash))
    }

    fn decode_blob(&self, pointer: &Pointer, blob: Option<String>) -> RelayResult<Vec<u8>> {
        let encoded = blob.filter(|b| !b.is_empty()).ok_or_else(|| {
            RelayError::invalid_values(&pointer.id, "Missing data for new pointer")
        })?;

        let bytes = Base64::decode_vec(&encoded).map_err(|_| {
            RelayError::invalid_values(&pointer.id, "Invalid data encoding, expecting base64")
        })?;

        if sha256_hex(&bytes) != pointer.pointerhash {
            return Err(RelayError::new(
                ErrorKind::InvalidDataHash,
                &pointer.id,
                "Hash mismatch of data and pointerhash",
            ));
        }
        if bytes.len() > self.settings.data_block_limit {
            return Err(RelayError::invalid_size(
                &pointer.id,
                format!(
                    "Data size {} exceeds data block limit {}",
                    bytes.len(),
                    self.settings.data_block_limit
                ),
            ));
        }
        if bytes.len() as u64 != pointer.size {
            return Err(RelayError::invalid_size(&pointer.id, "Data size mismatch"));
        }
        Ok(bytes)
    }

    /// Remove a blob again if no row ended up referencing it.
    async fn discard_unreferenced_blob(&self, pointerhash: &str) {
        match self.store.references(pointerhash.to_string()).await {
            Ok(0) => {
                let hash = pointerhash.to_string();
                let removed = self
                    .blob_write(pointerhash, move |blobs, deadline| blobs.delete(&hash, deadline))
                    .await;
                match removed {
                    Ok(Ok(())) | Ok(Err(BlobError::NotFound(_))) => {
                        debug!(pointerhash, "Removed unreferenced blob after failed insert");
                    }
                    Ok(Err(e)) => {
                        warn!(pointerhash, error = %e, "Failed to remove unreferenced blob")
                    }
                    Err(e) => warn!(pointerhash, error = %e, "Failed to remove unreferenced blob"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(pointerhash, error = %e, "Could not check blob references"),
        }
    }

    // =========================================================================
    // Replace
    // =========================================================================

    /// Supersede pointer `old_id` with a new pointer for the same owner,
    /// pointerhash and size.
    pub async fn replace(
        &self,
        old_id: &str,
        draft: PointerDraft,
    ) -> RelayResult<(String, String)> {
        let pointer = verified(draft)?;
        self.authorize(&pointer, Action::Replace)?;

        let _hash = self.hash_locks.lock(&pointer.pointerhash).await;
        self.replace_locked(old_id, pointer).await
    }

    /// Replace body; the caller holds the pointerhash stripe.
    async fn replace_locked(
        &self,
        old_id: &str,
        pointer: Pointer,
    ) -> RelayResult<(String, String)> {
        if old_id == pointer.id {
            return Err(RelayError::notice(&pointer.id, "Duplicate pointer, ignoring"));
        }

        let old = self.lookup_id(old_id).await?.ok_or_else(|| {
            RelayError::invalid_pointer(&pointer.id, "Pointer to replace does not exist")
        })?;

        if old.pubkey != pointer.pubkey || old.pointerhash != pointer.pointerhash {
            return Err(RelayError::invalid_pointer(
                &pointer.id,
                "Replacement must keep pubkey and pointerhash",
            ));
        }
        if old.size != pointer.size {
            return Err(RelayError::invalid_size(&pointer.id, "Data size mismatch"));
        }

        let superseded = self
            .store
            .replace(old.id.clone(), pointer.clone())
            .await
            .map_err(|e| match e {
                StoreError::Db(PointerDbError::NotFound(_)) => {
                    RelayError::invalid_pointer(&pointer.id, "Pointer to replace does not exist")
                }
                other => insert_error(&pointer.id, other),
            })?;

        self.cache.remove(&superseded.id);
        self.cache.add(pointer.clone());

        info!(
            id = %pointer.id,
            replaced = %superseded.id,
            pubkey = %pointer.pubkey,
            "Replaced pointer"
        );
        Ok((pointer.id, pointer.pointerhash))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete the owner's pointer named by a freshly signed claim.
    ///
    /// Returns the id of the deleted pointer. The blob goes too once nothing
    /// references it.
    pub async fn delete(&self, claim: PointerDraft) -> RelayResult<String> {
        let claim = verified(claim)?;
        self.authorize(&claim, Action::Delete)?;

        let _hash = self.hash_locks.lock(&claim.pointerhash).await;

        let stored = self
            .lookup_owner_hash(&claim.id, &claim.pubkey, &claim.pointerhash)
            .await?
            .ok_or_else(|| RelayError::invalid_pointer(&claim.id, "Pointer does not exist"))?;

        check_deletion_claim(&claim, &stored, now())?;

        let (removed, orphaned) = self.store.delete(stored.id.clone()).await.map_err(|e| match e {
            StoreError::Db(PointerDbError::NotFound(_)) => {
                RelayError::invalid_pointer(&claim.id, "Pointer does not exist")
            }
            other => store_error(&claim.id, other),
        })?;

        self.index.update(
            &removed.pubkey,
            -1,
            -i64::try_from(removed.size).unwrap_or(i64::MAX),
        );
        self.cache.remove(&removed.id);

        if orphaned {
            let hash = removed.pointerhash.clone();
            let deleted = self
                .blob_write(&claim.id, move |blobs, deadline| blobs.delete(&hash, deadline))
                .await;
            match deleted {
                Ok(Ok(())) => {}
                Ok(Err(BlobError::NotFound(_))) => {
                    debug!(pointerhash = %removed.pointerhash, "Blob already gone");
                }
                Ok(Err(e)) => {
                    warn!(pointerhash = %removed.pointerhash, error = %e, "Failed to delete blob")
                }
                Err(e) => {
                    warn!(pointerhash = %removed.pointerhash, error = %e, "Failed to delete blob")
                }
            }
        }

        info!(
            id = %removed.id,
            claim = %claim.id,
            pubkey = %removed.pubkey,
            blob_removed = orphaned,
            "Deleted pointer"
        );
        Ok(removed.id)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Pointers matching `criteria`. Rows failing verification are dropped.
    pub async fn query(&self, request_id: &str, criteria: &Value) -> RelayResult<Vec<Pointer>> {
        let query = QueryCriteria::parse(criteria)
            .and_then(QueryCriteria::into_query)
            .map_err(|e| RelayError::invalid_query(request_id, e.to_string()))?;

        let rows = self
            .store
            .query(query)
            .await
            .map_err(|e| store_error(request_id, e))?;
        Ok(rows.into_iter().filter(Pointer::verify).collect())
    }

    /// Resolve a pointer and return `(pointerhash, base64 blob)`.
    pub async fn get_blob_by_pointer_id(&self, id: &str) -> RelayResult<(String, String)> {
        let pointer = self
            .lookup_id(id)
            .await?
            .ok_or_else(|| RelayError::invalid_pointer(id, "Pointer not found"))?;

        let hash = pointer.pointerhash.clone();
        let bytes = self
            .blob_call(id, move |blobs| blobs.get(&hash))
            .await?
            .map_err(|e| blob_read_error(id, e))?;

        if bytes.len() as u64 != pointer.size {
            return Err(RelayError::invalid_size(id, "Data size mismatch"));
        }
        Ok((pointer.pointerhash, Base64::encode_string(&bytes)))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn authorize(&self, pointer: &Pointer, action: Action) -> RelayResult<()> {
        let usage = self.index.get(&pointer.pubkey);
        let (kind, message) = match self.filter.authorize(pointer, action, usage) {
            FilterDecision::Accepted => return Ok(()),
            FilterDecision::PublishDenied => {
                (ErrorKind::InvalidPubkey, "Publishing not allowed for this key")
            }
            FilterDecision::ReplaceDenied => {
                (ErrorKind::InvalidPubkey, "Replacing not allowed for this key")
            }
            FilterDecision::DeleteDenied => {
                (ErrorKind::InvalidPubkey, "Deleting not allowed for this key")
            }
            FilterDecision::CountQuotaExceeded => {
                (ErrorKind::CountQuotaExceeded, "Pointer count quota exceeded")
            }
            FilterDecision::SizeQuotaExceeded => {
                (ErrorKind::SizeQuotaExceeded, "Pointer size quota exceeded")
            }
        };
        Err(RelayError::new(kind, &pointer.id, message))
    }

    /// Pointer by id: cache first, then the database.
    async fn lookup_id(&self, id: &str) -> RelayResult<Option<Pointer>> {
        if let Some(pointer) = self.cache.get(id) {
            return Ok(Some(pointer));
        }
        let found = self
            .store
            .get(id.to_string())
            .await
            .map_err(|e| store_error(id, e))?;
        Ok(found.filter(|p| self.recache(p)))
    }

    /// Owner's pointer for a hash: cache first, then the database.
    async fn lookup_owner_hash(
        &self,
        context_id: &str,
        pubkey: &str,
        pointerhash: &str,
    ) -> RelayResult<Option<Pointer>> {
        if let Some(pointer) = self.cache.find_by_owner_and_hash(pubkey, pointerhash) {
            return Ok(Some(pointer));
        }
        let found = self
            .store
            .find_by_owner_and_hash(pubkey.to_string(), pointerhash.to_string())
            .await
            .map_err(|e| store_error(context_id, e))?;
        Ok(found.filter(|p| self.recache(p)))
    }

    /// Put a database hit back into the cache. Unverifiable rows are hidden.
    fn recache(&self, pointer: &Pointer) -> bool {
        if !pointer.verify() {
            warn!(id = %pointer.id, "Stored pointer failed verification");
            return false;
        }
        self.cache.add(pointer.clone());
        true
    }

    async fn blob_call<T, F>(&self, context_id: &str, op: F) -> RelayResult<BlobResult<T>>
    where
        F: FnOnce(&BlobStore) -> BlobResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let blobs = self.blobs.clone();
        run_bounded(self.settings.blob_timeout, move || op(&blobs))
            .await
            .map_err(|e| unavailable(context_id, e))
    }

    /// Blob mutation, awaited until it has finished or rolled back.
    async fn blob_write<T, F>(&self, context_id: &str, op: F) -> RelayResult<BlobResult<T>>
    where
        F: FnOnce(&BlobStore, Deadline) -> BlobResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let blobs = self.blobs.clone();
        run_settled(self.settings.blob_timeout, move |deadline| op(&blobs, deadline))
            .await
            .map_err(|e| unavailable(context_id, e))
    }
}

fn unavailable(context_id: &str, err: Unavailable) -> RelayError {
    warn!(context_id, error = %err, "Storage call did not complete");
    RelayError::storage_unavailable(context_id, err.to_string())
}

fn store_error(context_id: &str, err: StoreError) -> RelayError {
    match err {
        StoreError::Unavailable(e) => unavailable(context_id, e),
        StoreError::Db(e) => {
            warn!(context_id, error = %e, "Pointer database error");
            RelayError::new(ErrorKind::ErrorRetrievingPointers, context_id, "")
        }
    }
}

fn insert_error(context_id: &str, err: StoreError) -> RelayError {
    match err {
        StoreError::Db(PointerDbError::DuplicateId(_)) => {
            RelayError::notice(context_id, "Duplicate pointer, ignoring")
        }
        StoreError::Db(PointerDbError::OwnerHashTaken { .. }) => {
            RelayError::notice(context_id, "Pointer already exists for this key and pointerhash")
        }
        other => store_error(context_id, other),
    }
}

fn blob_read_error(context_id: &str, err: BlobError) -> RelayError {
    match err {
        BlobError::NotFound(_) => {
            RelayError::new(ErrorKind::DataNotFound, context_id, "Data not found")
        }
        BlobError::Corrupted { .. } => RelayError::new(
            ErrorKind::DataCorruption,
            context_id,
            "Stored data failed its integrity check",
        ),
        BlobError::Expired(_) => RelayError::storage_unavailable(context_id, err.to_string()),
        BlobError::InvalidHash(_) | BlobError::Io(_) => {
            warn!(context_id, error = %err, "Blob read failed");
            RelayError::new(ErrorKind::ErrorRetrievingData, context_id, "Data empty")
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
