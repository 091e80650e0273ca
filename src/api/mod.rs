// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod relay;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/ws", get(relay::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::state::test_settings;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn liveness_and_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(&test_settings(dir.path())).await.unwrap();
        let app = router(state);

        let (status, body) = get_json(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["blob_store"], "ok");
        assert_eq!(body["checks"]["database"], "ok");
    }

    #[tokio::test]
    async fn readiness_degrades_without_blob_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let state = AppState::open(&settings).await.unwrap();
        std::fs::remove_dir_all(&settings.storage.directory).unwrap();

        let (status, body) = get_json(router(state), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["blob_store"], "unavailable");
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(&test_settings(dir.path())).await.unwrap();

        let response = router(state)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
