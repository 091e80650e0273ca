// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Readiness response with individual component status.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub service: String,
    /// Write-read-delete check of the blob directory.
    pub blob_store: String,
    /// Read transaction against the pointer database.
    pub database: String,
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

fn outcome(ok: bool) -> String {
    if ok { "ok" } else { "unavailable" }.to_string()
}

/// Liveness check. Always 200 while the process runs.
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check.
///
/// Returns 200 only if the blob directory and the database both respond.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let blob_ok = state.service.check_blob_store().await.is_ok();
    let db_ok = state.service.store().check().await.is_ok();
    let all_ok = blob_ok && db_ok;

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            blob_store: outcome(blob_ok),
            database: outcome(db_ok),
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
