// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded pointer database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `pointers`: id → serialized [`Pointer`]
//! - `owner_hash_index`: `pubkey|pointerhash` → id (one live pointer per pair)
//! - `hash_refs`: pointerhash → number of pointer rows referencing it
//!
//! Every mutation updates all three tables in a single write transaction, so
//! the uniqueness of `(pubkey, pointerhash)` and the blob reference counts
//! can never drift from the rows themselves. Mutations take a [`Deadline`]
//! and abort instead of committing once it has passed.

use std::collections::BTreeMap;
use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};

use super::{Deadline, PointerQuery, Unavailable};
use crate::pointer::Pointer;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: id → serialized Pointer (JSON bytes).
const POINTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("pointers");

/// Index: `pubkey|pointerhash` → id.
const OWNER_HASH_INDEX: TableDefinition<&str, &str> = TableDefinition::new("owner_hash_index");

/// Reference counts: pointerhash → live rows pointing at it.
const HASH_REFS: TableDefinition<&str, u64> = TableDefinition::new("hash_refs");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PointerDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pointer already exists: {0}")]
    DuplicateId(String),

    #[error("{pubkey} already has pointer {existing} for hash {pointerhash}")]
    OwnerHashTaken {
        pubkey: String,
        pointerhash: String,
        existing: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("write rolled back: {0}")]
    Expired(#[from] Unavailable),
}

pub type PointerDbResult<T> = Result<T, PointerDbError>;

/// Per-owner totals, as used to rebuild the quota index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerAggregate {
    pub pubkey: String,
    pub pointer_count: u64,
    pub pointer_hash_sum: u64,
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Key of the owner/hash index: `pubkey|pointerhash`.
fn make_owner_key(pubkey: &str, pointerhash: &str) -> String {
    format!("{pubkey}|{pointerhash}")
}

/// Range start for all index entries of one owner.
fn make_prefix(pubkey: &str) -> String {
    format!("{pubkey}|")
}

/// Range end for all index entries of one owner (`}` sorts right after `|`).
fn make_prefix_end(pubkey: &str) -> String {
    format!("{pubkey}}}")
}

fn decode(bytes: &[u8]) -> PointerDbResult<Pointer> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Commit `write_txn`, or abort it if `deadline` has already passed.
fn commit_before(write_txn: WriteTransaction, deadline: Deadline) -> PointerDbResult<()> {
    if let Err(e) = deadline.check() {
        write_txn.abort()?;
        return Err(e.into());
    }
    write_txn.commit()?;
    Ok(())
}

// =============================================================================
// PointerDb
// =============================================================================

/// Embedded ACID pointer database.
pub struct PointerDb {
    db: Database,
}

impl PointerDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> PointerDbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(POINTERS)?;
            let _ = write_txn.open_table(OWNER_HASH_INDEX)?;
            let _ = write_txn.open_table(HASH_REFS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap read for readiness checks.
    pub fn check(&self) -> PointerDbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(POINTERS)?;
        Ok(())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert a new pointer row.
    ///
    /// Fails with `DuplicateId` if the id exists and with `OwnerHashTaken` if
    /// the owner already has a pointer for this hash.
    pub fn insert(&self, pointer: &Pointer, deadline: Deadline) -> PointerDbResult<()> {
        let json = serde_json::to_vec(pointer)?;
        let owner_key = make_owner_key(&pointer.pubkey, &pointer.pointerhash);

        let write_txn = self.db.begin_write()?;
        {
            let mut rows = write_txn.open_table(POINTERS)?;
            let mut index = write_txn.open_table(OWNER_HASH_INDEX)?;
            let mut refs = write_txn.open_table(HASH_REFS)?;

            if rows.get(pointer.id.as_str())?.is_some() {
                return Err(PointerDbError::DuplicateId(pointer.id.clone()));
            }
            if let Some(existing) = index.get(owner_key.as_str())? {
                return Err(PointerDbError::OwnerHashTaken {
                    pubkey: pointer.pubkey.clone(),
                    pointerhash: pointer.pointerhash.clone(),
                    existing: existing.value().to_string(),
                });
            }

            rows.insert(pointer.id.as_str(), json.as_slice())?;
            index.insert(owner_key.as_str(), pointer.id.as_str())?;

            let count = refs.get(pointer.pointerhash.as_str())?.map(|v| v.value()).unwrap_or(0);
            refs.insert(pointer.pointerhash.as_str(), count + 1)?;
        }
        commit_before(write_txn, deadline)?;
        Ok(())
    }

    /// Swap the row `old_id` for `pointer` in one transaction.
    ///
    /// Returns the superseded pointer.
    pub fn replace(
        &self,
        old_id: &str,
        pointer: &Pointer,
        deadline: Deadline,
    ) -> PointerDbResult<Pointer> {
        let json = serde_json::to_vec(pointer)?;
        let new_key = make_owner_key(&pointer.pubkey, &pointer.pointerhash);

        let write_txn = self.db.begin_write()?;
        let old = {
            let mut rows = write_txn.open_table(POINTERS)?;
            let mut index = write_txn.open_table(OWNER_HASH_INDEX)?;
            let mut refs = write_txn.open_table(HASH_REFS)?;

            let old = match rows.remove(old_id)? {
                Some(value) => decode(value.value())?,
                None => return Err(PointerDbError::NotFound(format!("Pointer {old_id}"))),
            };
            if rows.get(pointer.id.as_str())?.is_some() {
                return Err(PointerDbError::DuplicateId(pointer.id.clone()));
            }

            index.remove(make_owner_key(&old.pubkey, &old.pointerhash).as_str())?;
            if let Some(existing) = index.get(new_key.as_str())? {
                return Err(PointerDbError::OwnerHashTaken {
                    pubkey: pointer.pubkey.clone(),
                    pointerhash: pointer.pointerhash.clone(),
                    existing: existing.value().to_string(),
                });
            }

            rows.insert(pointer.id.as_str(), json.as_slice())?;
            index.insert(new_key.as_str(), pointer.id.as_str())?;

            if old.pointerhash != pointer.pointerhash {
                let added = refs
                    .get(pointer.pointerhash.as_str())?
                    .map(|v| v.value())
                    .unwrap_or(0);
                refs.insert(pointer.pointerhash.as_str(), added + 1)?;

                let dropped = refs
                    .get(old.pointerhash.as_str())?
                    .map(|v| v.value())
                    .unwrap_or(0);
                if dropped <= 1 {
                    refs.remove(old.pointerhash.as_str())?;
                } else {
                    refs.insert(old.pointerhash.as_str(), dropped - 1)?;
                }
            }
            old
        };
        commit_before(write_txn, deadline)?;
        Ok(old)
    }

    /// Delete a pointer row.
    ///
    /// Returns the removed pointer and whether its blob is now unreferenced.
    pub fn delete(&self, id: &str, deadline: Deadline) -> PointerDbResult<(Pointer, bool)> {
        let write_txn = self.db.begin_write()?;
        let (removed, remaining) = {
            let mut rows = write_txn.open_table(POINTERS)?;
            let mut index = write_txn.open_table(OWNER_HASH_INDEX)?;
            let mut refs = write_txn.open_table(HASH_REFS)?;

            let removed = match rows.remove(id)? {
                Some(value) => decode(value.value())?,
                None => return Err(PointerDbError::NotFound(format!("Pointer {id}"))),
            };
            index.remove(make_owner_key(&removed.pubkey, &removed.pointerhash).as_str())?;

            let count = refs.get(removed.pointerhash.as_str())?.map(|v| v.value()).unwrap_or(0);
            let remaining = count.saturating_sub(1);
            if remaining == 0 {
                refs.remove(removed.pointerhash.as_str())?;
            } else {
                refs.insert(removed.pointerhash.as_str(), remaining)?;
            }
            (removed, remaining)
        };
        commit_before(write_txn, deadline)?;
        Ok((removed, remaining == 0))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Look up a single pointer by id.
    pub fn get(&self, id: &str) -> PointerDbResult<Option<Pointer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(POINTERS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// The owner's live pointer for `pointerhash`, if any.
    pub fn find_by_owner_and_hash(
        &self,
        pubkey: &str,
        pointerhash: &str,
    ) -> PointerDbResult<Option<Pointer>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(OWNER_HASH_INDEX)?;
        let rows = read_txn.open_table(POINTERS)?;

        let Some(id) = index.get(make_owner_key(pubkey, pointerhash).as_str())? else {
            return Ok(None);
        };
        match rows.get(id.value())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Number of rows referencing `pointerhash`.
    pub fn references(&self, pointerhash: &str) -> PointerDbResult<u64> {
        let read_txn = self.db.begin_read()?;
        let refs = read_txn.open_table(HASH_REFS)?;
        Ok(refs.get(pointerhash)?.map(|v| v.value()).unwrap_or(0))
    }

    /// Every stored pointer.
    pub fn all_pointers(&self) -> PointerDbResult<Vec<Pointer>> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(POINTERS)?;
        let mut out = Vec::new();
        for entry in rows.iter()? {
            let (_, value) = entry?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    /// Count and size sum of pointers per owner.
    pub fn aggregate_by_owner(&self) -> PointerDbResult<Vec<OwnerAggregate>> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(POINTERS)?;

        let mut totals: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for entry in rows.iter()? {
            let (_, value) = entry?;
            let pointer = decode(value.value())?;
            let slot = totals.entry(pointer.pubkey).or_default();
            slot.0 += 1;
            slot.1 = slot.1.saturating_add(pointer.size);
        }

        Ok(totals
            .into_iter()
            .map(|(pubkey, (pointer_count, pointer_hash_sum))| OwnerAggregate {
                pubkey,
                pointer_count,
                pointer_hash_sum,
            })
            .collect())
    }

    /// Run a query, picking the narrowest access path available.
    ///
    /// `ids` go straight to the primary table, `owners` scan their slice of
    /// the owner/hash index, anything else is a full scan.
    pub fn query(&self, query: &PointerQuery) -> PointerDbResult<Vec<Pointer>> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(POINTERS)?;
        let mut out = Vec::new();

        if let Some(ids) = &query.ids {
            for id in ids {
                if out.len() >= query.limit {
                    break;
                }
                if let Some(value) = rows.get(id.as_str())? {
                    let pointer = decode(value.value())?;
                    if query.matches(&pointer) && !out.contains(&pointer) {
                        out.push(pointer);
                    }
                }
            }
            return Ok(out);
        }

        if let Some(owners) = &query.owners {
            let index = read_txn.open_table(OWNER_HASH_INDEX)?;
            'owners: for owner in owners {
                let start = make_prefix(owner);
                let end = make_prefix_end(owner);
                for entry in index.range(start.as_str()..end.as_str())? {
                    let (_, id) = entry?;
                    if let Some(value) = rows.get(id.value())? {
                        let pointer = decode(value.value())?;
                        if query.matches(&pointer) && !out.contains(&pointer) {
                            out.push(pointer);
                        }
                    }
                    if out.len() >= query.limit {
                        break 'owners;
                    }
                }
            }
            return Ok(out);
        }

        for entry in rows.iter()? {
            let (_, value) = entry?;
            let pointer = decode(value.value())?;
            if query.matches(&pointer) {
                out.push(pointer);
                if out.len() >= query.limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
impl PointerDb {
    /// Hold the write lock for `hold`, signalling `taken` once it is held.
    pub(crate) fn stall_writer(
        &self,
        hold: std::time::Duration,
        taken: std::sync::mpsc::Sender<()>,
    ) {
        let write_txn = self.db.begin_write().unwrap();
        taken.send(()).unwrap();
        std::thread::sleep(hold);
        write_txn.abort().unwrap();
    }
}

// =============================================================================
// Tests
// =============================================================================
