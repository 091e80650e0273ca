// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Settings are read once at startup from a JSON file and validated before
//! anything is opened. Every option has a default, so a missing file simply
//! means "all defaults".
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SETTINGS_FILE` | Path of the JSON settings file | `settings.json` |
//! | `HOST` | Overrides `server.host` | unset |
//! | `PORT` | Overrides `server.port` | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! ## Settings File
//!
//! ```json
//! {
//!   "server": { "host": "0.0.0.0", "port": 8080, "sessionTimeout": 300 },
//!   "database": { "path": "data/pointers.redb", "timeoutSeconds": 10 },
//!   "storage": { "directory": "data/blobs", "fileSuffix": "blob",
//!                "dataBlockLimit": 512000, "timeoutSeconds": 10 },
//!   "pointer": { "timestampDelta": 0 },
//!   "cache": {
//!     "blobCache": { "enabled": true, "blobCacheTTL": 300, "blobCacheSizeLimit": 100000000 },
//!     "pointerCache": { "cacheTTL": 0, "maxEntries": 0 },
//!     "sweepIntervalSeconds": 10
//!   },
//!   "filter": { "groups": [] }
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::filter::{FilterError, FilterGroup, KeyFilter};
use crate::protocol::ProtocolSettings;
use crate::storage::paths::{DEFAULT_BLOB_DIR, DEFAULT_FILE_SUFFIX};

/// Environment variable naming the settings file.
pub const SETTINGS_FILE_ENV: &str = "SETTINGS_FILE";

/// Settings file used when `SETTINGS_FILE` is unset.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the bind host.
pub const HOST_ENV: &str = "HOST";

/// Environment variable overriding the bind port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable selecting the log format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid bind address {0:?}")]
    InvalidAddress(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("storage.directory must not be empty")]
    EmptyBlobDirectory,
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Idle WebSocket sessions are closed after this many seconds.
    pub session_timeout: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            session_timeout: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/pointers.redb"),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub file_suffix: String,
    pub data_block_limit: usize,
    pub timeout_seconds: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_BLOB_DIR),
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            data_block_limit: 512_000,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PointerSettings {
    /// `0` disables the publish timestamp check.
    pub timestamp_delta: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobCacheSettings {
    pub enabled: bool,
    #[serde(rename = "blobCacheTTL")]
    pub ttl_seconds: u64,
    #[serde(rename = "blobCacheSizeLimit")]
    pub size_limit: usize,
}

impl Default for BlobCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            size_limit: 100_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerCacheSettings {
    /// `0` keeps entries forever.
    #[serde(rename = "cacheTTL")]
    pub ttl_seconds: u64,
    /// `0` means unbounded.
    #[serde(rename = "maxEntries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub blob_cache: BlobCacheSettings,
    pub pointer_cache: PointerCacheSettings,
    pub sweep_interval_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            blob_cache: BlobCacheSettings::default(),
            pointer_cache: PointerCacheSettings::default(),
            sweep_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Ordered; empty means the built-in `default` group.
    pub groups: Vec<FilterGroup>,
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub pointer: PointerSettings,
    pub cache: CacheSettings,
    pub filter: FilterSettings,
}

impl Settings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `SETTINGS_FILE` and apply `HOST`/`PORT` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(SETTINGS_FILE_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_FILE.into());
        let mut settings = Self::load(Path::new(&path))?;

        if let Ok(host) = env::var(HOST_ENV) {
            settings.server.host = host;
        }
        if let Ok(port) = env::var(PORT_ENV) {
            settings.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: PORT_ENV,
                value: port,
            })?;
        }
        Ok(settings)
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.key_filter()?;
        self.bind_addr()?;

        if self.storage.data_block_limit == 0 {
            return Err(ConfigError::Zero("storage.dataBlockLimit"));
        }
        if self.storage.timeout_seconds == 0 {
            return Err(ConfigError::Zero("storage.timeoutSeconds"));
        }
        if self.database.timeout_seconds == 0 {
            return Err(ConfigError::Zero("database.timeoutSeconds"));
        }
        if self.cache.sweep_interval_seconds == 0 {
            return Err(ConfigError::Zero("cache.sweepIntervalSeconds"));
        }
        if self.storage.directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBlobDirectory);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }

    pub fn key_filter(&self) -> Result<KeyFilter, ConfigError> {
        Ok(KeyFilter::from_groups(self.filter.groups.clone())?)
    }

    pub fn protocol(&self) -> ProtocolSettings {
        ProtocolSettings {
            timestamp_delta: self.pointer.timestamp_delta,
            data_block_limit: self.storage.data_block_limit,
            blob_timeout: Duration::from_secs(self.storage.timeout_seconds),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.server.session_timeout)
    }

    pub fn database_timeout(&self) -> Duration {
        Duration::from_secs(self.database.timeout_seconds)
    }

    /// `None` when the blob cache is disabled.
    pub fn blob_cache_ttl(&self) -> Option<Duration> {
        self.cache
            .blob_cache
            .enabled
            .then(|| Duration::from_secs(self.cache.blob_cache.ttl_seconds))
    }

    /// `None` when pointer cache entries never expire.
    pub fn pointer_cache_ttl(&self) -> Option<Duration> {
        match self.cache.pointer_cache.ttl_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DEFAULT_GROUP;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.storage.data_block_limit, 512_000);
        assert_eq!(settings.cache.blob_cache.size_limit, 100_000_000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{
                "server": { "port": 9000 },
                "cache": {
                    "blobCache": { "blobCacheTTL": 60 },
                    "pointerCache": { "cacheTTL": 30 }
                },
                "pointer": { "timestampDelta": 120 },
                "filter": { "groups": [
                    { "name": "vip", "canpublish": true, "maximumpointers": 5, "pubkeys": ["aa"] },
                    { "name": "default", "canpublish": true }
                ] }
            }"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.blob_cache_ttl(), Some(Duration::from_secs(60)));
        assert_eq!(settings.pointer_cache_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(settings.protocol().timestamp_delta, 120);

        let filter = settings.key_filter().unwrap();
        assert_eq!(filter.classify("aa").maximumpointers, 5);
        assert_eq!(filter.classify("bb").name, DEFAULT_GROUP);
        assert!(!filter.classify("bb").candelete);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));

        // Quotas are unsigned; a negative ceiling does not parse.
        fs::write(&path, r#"{"filter":{"groups":[{"name":"default","maximumpointers":-1}]}}"#)
            .unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn validate_rejects_unusable_settings() {
        let mut settings = Settings::default();
        settings.filter.groups = vec![FilterGroup {
            name: "vip".into(),
            ..FilterGroup::default()
        }];
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Filter(FilterError::MissingDefault))
        ));

        let mut settings = Settings::default();
        settings.storage.data_block_limit = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::Zero(_))));

        let mut settings = Settings::default();
        settings.storage.directory = PathBuf::new();
        assert!(matches!(settings.validate(), Err(ConfigError::EmptyBlobDirectory)));

        let mut settings = Settings::default();
        settings.server.host = "not a host".into();
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn disabled_blob_cache_has_no_ttl() {
        let mut settings = Settings::default();
        settings.cache.blob_cache.enabled = false;
        assert_eq!(settings.blob_cache_ttl(), None);
        assert_eq!(settings.pointer_cache_ttl(), None);
    }
}
