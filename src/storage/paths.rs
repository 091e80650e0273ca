// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the blob storage layout.

use std::path::{Path, PathBuf};

/// Default directory holding blob files.
pub const DEFAULT_BLOB_DIR: &str = "data/blobs";

/// Default blob file extension.
pub const DEFAULT_FILE_SUFFIX: &str = "blob";

/// Storage path utilities for content-addressed blobs.
///
/// Every blob lives directly under the root as `{hash}.{suffix}`.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
    suffix: String,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_DIR, DEFAULT_FILE_SUFFIX)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            suffix: suffix.into(),
        }
    }

    /// Root directory for all blob files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File extension used for blobs.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Path of the blob with the given content hash.
    pub fn blob(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.{}", self.suffix))
    }

    /// Scratch path used while a blob is being written.
    pub fn blob_temp(&self, hash: &str, nonce: &str) -> PathBuf {
        self.root.join(format!(".{hash}.{nonce}.tmp"))
    }

    /// Scratch file used by one run of the readiness check.
    pub fn health_check_file(&self, nonce: &str) -> PathBuf {
        self.root.join(format!(".health_check.{nonce}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_relative_data_dir() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("data/blobs"));
        assert_eq!(paths.suffix(), "blob");
    }

    #[test]
    fn blob_files_are_named_by_hash() {
        let paths = StoragePaths::new("/tmp/blobs", "bin");
        assert_eq!(paths.blob("abcd"), PathBuf::from("/tmp/blobs/abcd.bin"));
    }

    #[test]
    fn temp_files_are_hidden_and_distinct() {
        let paths = StoragePaths::new("/tmp/blobs", "blob");
        let a = paths.blob_temp("abcd", "1");
        let b = paths.blob_temp("abcd", "2");
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.')));
        assert_ne!(a, paths.blob("abcd"));
    }

    #[test]
    fn health_check_files_are_hidden_and_per_run() {
        let paths = StoragePaths::new("/tmp/blobs", "blob");
        assert_eq!(paths.health_check_file("1"), PathBuf::from("/tmp/blobs/.health_check.1"));
        assert_ne!(paths.health_check_file("1"), paths.health_check_file("2"));
    }
}
