// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pointer_relay::api::router;
use pointer_relay::config::Settings;
use pointer_relay::logging::{init_tracing, LogFormat};
use pointer_relay::state::AppState;
use pointer_relay::sweeper::Sweeper;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Pointer relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    settings.validate()?;

    let state = AppState::open(&settings).await?;
    let shutdown = CancellationToken::new();

    let sweeper = Sweeper::new(
        state.service.blobs().cache().cloned(),
        Arc::clone(state.service.pointer_cache()),
    )
    .with_interval(settings.sweep_interval());
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let addr = settings.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Pointer relay listening (WebSocket at /ws)");

    let app = router(state);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper_task.await;
    info!("Pointer relay stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
