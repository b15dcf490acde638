// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use auth_token_service::{
    api::router,
    config::ServerConfig,
    identity::UserInfoVerifier,
    notify::LogNotifier,
    state::AppState,
    storage::{AuthDatabase, DATABASE_FILE},
    tasks::BackgroundTaskRunner,
    telemetry,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init();

    let config = ServerConfig::from_env()?;
    info!(
        identity = %config.tokens.identity,
        data_dir = %config.data_dir.display(),
        transport = ?config.transport,
        "Loaded configuration"
    );

    let db = AuthDatabase::open(&config.data_dir.join(DATABASE_FILE), config.store_timeout)?;
    let identity = UserInfoVerifier::new(config.userinfo_url.clone())?;
    let tasks = BackgroundTaskRunner::new();
    let state = AppState::new(
        &config,
        db,
        Arc::new(LogNotifier),
        Arc::new(identity),
        tasks.clone(),
    );
    let app = router(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Auth token service listening on http://{addr} (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, draining background tasks");
    if !tasks.shutdown(config.shutdown_grace).await {
        warn!("Exiting with background tasks still running");
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
