// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pointer Relay - storage relay for signed, content-addressed pointers
//!
//! Clients publish small signed records ("pointers") naming a blob by its
//! SHA-256 hash. The relay verifies them, stores each blob once, enforces
//! per-key quotas and serves both back on request.
//!
//! ## Modules
//!
//! - `pointer` - Pointer records, id derivation, Schnorr signatures
//! - `storage` - Blob store, blob cache, pointer database and caches
//! - `filter` - Per-key policy groups and quotas
//! - `protocol` - Publish / replace / delete orchestration
//! - `api` - HTTP health checks and the WebSocket command surface (Axum)
//! - `sweeper` - Background cache expiry

pub mod api;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pointer;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod sweeper;
