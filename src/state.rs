// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{ConfigError, Settings};
use crate::error::RelayError;
use crate::protocol::PointerService;
use crate::storage::{
    BlobCache, BlobStore, PointerCache, PointerDbError, PointerIndex, PointerStore, StoragePaths,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open pointer database: {0}")]
    Database(#[from] PointerDbError),

    #[error("failed to initialize storage: {0}")]
    Storage(#[from] RelayError),
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PointerService>,
    /// Idle WebSocket sessions are closed after this long.
    pub session_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<PointerService>, session_timeout: Duration) -> Self {
        Self {
            service,
            session_timeout,
        }
    }

    /// Open storage described by `settings`, warm the caches and rebuild the
    /// quota index.
    pub async fn open(settings: &Settings) -> Result<Self, StartupError> {
        let filter = settings.key_filter()?;

        let store = PointerStore::open(&settings.database.path, settings.database_timeout())?;

        let blob_cache = settings
            .blob_cache_ttl()
            .map(|ttl| Arc::new(BlobCache::new(settings.cache.blob_cache.size_limit, ttl)));
        let blobs = BlobStore::new(
            StoragePaths::new(&settings.storage.directory, settings.storage.file_suffix.clone()),
            blob_cache,
        );

        let service = PointerService::new(
            store,
            blobs,
            Arc::new(PointerCache::new(
                settings.pointer_cache_ttl(),
                settings.cache.pointer_cache.max_entries,
            )),
            Arc::new(PointerIndex::new()),
            filter,
            settings.protocol(),
        );

        let summary = service.initialize().await?;
        info!(
            cached_pointers = summary.cached_pointers,
            indexed_keys = summary.indexed_keys,
            database = %settings.database.path.display(),
            blob_dir = %settings.storage.directory.display(),
            "Storage initialized"
        );

        Ok(Self::new(Arc::new(service), settings.session_timeout()))
    }
}

/// Settings rooted in a temporary directory, for tests.
#[cfg(test)]
pub(crate) fn test_settings(root: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.database.path = root.join("db").join("pointers.redb");
    settings.storage.directory = root.join("blobs");
    settings
}
