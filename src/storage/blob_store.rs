// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Content-addressed blob files.
//!
//! Blobs are named by the lowercase hex sha-256 of their bytes. Callers never
//! choose a name; they hand over bytes and get the hash back. Reads re-hash
//! what comes off disk, so a tampered or truncated file surfaces as
//! [`BlobError::Corrupted`] rather than as data.
//!
//! The store does no reference counting. Whoever calls [`BlobStore::delete`]
//! must already know that nothing points at the blob any more.
//!
//! `put` and `delete` take a [`Deadline`]. Past it, `put` drops its temp file
//! instead of renaming it into place and `delete` leaves the blob alone.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{BlobCache, Deadline, StoragePaths, Unavailable};
use crate::pointer::identity::{is_hex_digest, sha256_hex};

/// Error type for blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob {hash} is corrupted (content hashes to {actual})")]
    Corrupted { hash: String, actual: String },

    #[error("not a blob hash: {0:?}")]
    InvalidHash(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob write abandoned: {0}")]
    Expired(#[from] Unavailable),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// File-backed blob store with an optional read-through cache.
#[derive(Clone)]
pub struct BlobStore {
    paths: StoragePaths,
    cache: Option<Arc<BlobCache>>,
}

impl BlobStore {
    pub fn new(paths: StoragePaths, cache: Option<Arc<BlobCache>>) -> Self {
        Self { paths, cache }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn cache(&self) -> Option<&Arc<BlobCache>> {
        self.cache.as_ref()
    }

    /// Create the blob directory. Safe to call multiple times.
    pub fn initialize(&self) -> BlobResult<()> {
        fs::create_dir_all(self.paths.root())?;
        Ok(())
    }

    /// Write-read-delete check of the blob directory.
    pub fn health_check(&self) -> BlobResult<()> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let scratch = self.paths.health_check_file(&nonce);
        let data = b"health_check_data";

        fs::write(&scratch, data)?;
        let read_back = fs::read(&scratch)?;
        fs::remove_file(&scratch)?;

        if read_back != data {
            return Err(BlobError::Corrupted {
                hash: "health_check".to_string(),
                actual: sha256_hex(&read_back),
            });
        }
        Ok(())
    }

    /// Store `bytes`, returning their hash. Storing existing content is a no-op.
    pub fn put(&self, bytes: &[u8], deadline: Deadline) -> BlobResult<String> {
        let hash = sha256_hex(bytes);
        let path = self.paths.blob(&hash);

        if !path.exists() {
            // Write to a private temp file, then rename into place.
            let nonce = uuid::Uuid::new_v4().simple().to_string();
            let temp_path = self.paths.blob_temp(&hash, &nonce);
            let written = (|| -> io::Result<()> {
                let file = File::create(&temp_path)?;
                let mut writer = BufWriter::new(file);
                writer.write_all(bytes)?;
                writer.flush()?;
                writer.get_ref().sync_all()?;
                Ok(())
            })();
            if let Err(e) = deadline.check() {
                let _ = fs::remove_file(&temp_path);
                return Err(e.into());
            }
            if let Err(e) = written.and_then(|_| fs::rename(&temp_path, &path)) {
                let _ = fs::remove_file(&temp_path);
                return Err(e.into());
            }
            debug!(hash = %hash, size = bytes.len(), "Stored blob");
        }

        if let Some(cache) = &self.cache {
            cache.insert(&hash, bytes);
        }
        Ok(hash)
    }

    /// Read a blob, verifying its content against `hash`.
    pub fn get(&self, hash: &str) -> BlobResult<Vec<u8>> {
        if !is_hex_digest(hash) {
            return Err(BlobError::InvalidHash(hash.to_string()));
        }

        // Cached entries were hashed when they were admitted.
        if let Some(bytes) = self.cache.as_ref().and_then(|cache| cache.get(hash)) {
            return Ok(bytes);
        }

        let bytes = match fs::read(self.paths.blob(hash)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(hash.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let actual = sha256_hex(&bytes);
        if actual != hash {
            warn!(hash, actual = %actual, "Blob failed integrity check");
            return Err(BlobError::Corrupted {
                hash: hash.to_string(),
                actual,
            });
        }

        if let Some(cache) = &self.cache {
            cache.insert(hash, &bytes);
        }
        Ok(bytes)
    }

    /// Remove a blob.
    pub fn delete(&self, hash: &str, deadline: Deadline) -> BlobResult<()> {
        if !is_hex_digest(hash) {
            return Err(BlobError::InvalidHash(hash.to_string()));
        }
        deadline.check()?;

        if let Some(cache) = &self.cache {
            cache.remove(hash);
        }

        match fs::remove_file(self.paths.blob(hash)) {
            Ok(()) => {
                debug!(hash, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a blob file exists for `hash`.
    pub fn exists(&self, hash: &str) -> bool {
        is_hex_digest(hash) && self.paths.blob(hash).is_file()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn setup(with_cache: bool) -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let cache = with_cache.then(|| Arc::new(BlobCache::new(1024, Duration::from_secs(60))));
        let store = BlobStore::new(StoragePaths::new(dir.path().join("blobs"), "blob"), cache);
        store.initialize().unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_returns_bytes() {
        let (_dir, store) = setup(false);
        let data: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let hash = store.put(&data, Deadline::none()).unwrap();
        assert_eq!(hash, sha256_hex(&data));
        assert!(store.paths().blob(&hash).is_file());
        assert_eq!(store.get(&hash).unwrap(), data);
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, store) = setup(false);
        let a = store.put(b"same bytes", Deadline::none()).unwrap();
        let b = store.put(b"same bytes", Deadline::none()).unwrap();
        assert_eq!(a, b);
        let files = fs::read_dir(store.paths().root()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn get_after_delete_is_not_found() {
        let (_dir, store) = setup(true);
        let hash = store.put(b"short lived", Deadline::none()).unwrap();
        store.delete(&hash, Deadline::none()).unwrap();

        assert!(matches!(store.get(&hash), Err(BlobError::NotFound(_))));
        assert!(matches!(store.delete(&hash, Deadline::none()), Err(BlobError::NotFound(_))));
        assert!(!store.exists(&hash));
    }

    #[test]
    fn tampered_file_is_reported_as_corrupted() {
        let (_dir, store) = setup(false);
        let hash = store.put(b"original", Deadline::none()).unwrap();
        fs::write(store.paths().blob(&hash), b"tampered").unwrap();

        match store.get(&hash) {
            Err(BlobError::Corrupted { hash: h, actual }) => {
                assert_eq!(h, hash);
                assert_eq!(actual, sha256_hex(b"tampered"));
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn invalid_hash_is_rejected_before_touching_disk() {
        let (_dir, store) = setup(false);
        assert!(matches!(
            store.get("../../etc/passwd"),
            Err(BlobError::InvalidHash(_))
        ));
    }

    #[test]
    fn reads_populate_cache() {
        let (_dir, store) = setup(true);
        let hash = store.put(b"cached", Deadline::none()).unwrap();
        let cache = store.cache().unwrap().clone();
        cache.remove(&hash);

        store.get(&hash).unwrap();
        assert!(cache.contains(&hash));

        store.delete(&hash, Deadline::none()).unwrap();
        assert!(!cache.contains(&hash));
    }

    #[test]
    fn health_check_passes_on_writable_dir() {
        let (_dir, store) = setup(false);
        store.health_check().unwrap();
        assert_eq!(fs::read_dir(store.paths().root()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_health_checks_do_not_collide() {
        let (_dir, store) = setup(false);
        let checks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || (0..20).try_for_each(|_| store.health_check()))
            })
            .collect();

        for check in checks {
            check.join().unwrap().unwrap();
        }
        assert_eq!(fs::read_dir(store.paths().root()).unwrap().count(), 0);
    }

    #[test]
    fn writes_past_their_deadline_change_nothing() {
        let (_dir, store) = setup(true);
        let expired = Deadline::after(Duration::ZERO);

        let err = store.put(b"too late", expired).unwrap_err();
        assert!(matches!(err, BlobError::Expired(_)));
        let hash = sha256_hex(b"too late");
        assert!(!store.exists(&hash));
        assert_eq!(fs::read_dir(store.paths().root()).unwrap().count(), 0);

        let hash = store.put(b"kept", Deadline::none()).unwrap();
        let err = store.delete(&hash, expired).unwrap_err();
        assert!(matches!(err, BlobError::Expired(_)));
        assert!(store.exists(&hash));
        assert!(store.cache().unwrap().contains(&hash));
    }
}
