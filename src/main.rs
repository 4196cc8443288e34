use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use postman::config::Settings;
use postman::server::{create_app, AppState};
use postman::shutdown::GracefulShutdown;
use postman::tasks::RecoveryTask;
use postman::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing; keep the guard alive until exit
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone())?;
    tracing::info!("Application state initialized");

    // Start dispatch workers
    state.scheduler.start();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start recovery sweep in background
    let recovery_task = RecoveryTask::new(
        state.scheduler.clone(),
        Duration::from_secs(settings.scheduler.recovery_interval_secs),
        shutdown_tx.subscribe(),
    );
    let recovery_handle = tokio::spawn(async move {
        recovery_task.run().await;
    });

    let scheduler = state.scheduler.clone();

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        smssync = settings.smssync.enabled,
        endpoint = %settings.smssync.endpoint,
        "Server listening on {}",
        addr
    );

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    // Stop background tasks, drain the dispatch queue
    let result = GracefulShutdown::new(scheduler, shutdown_tx)
        .execute("server stopped")
        .await;
    if !result.queue_drained {
        tracing::warn!(
            jobs_abandoned = result.jobs_abandoned,
            "Dispatch queue did not drain; unsent messages are recovered on next start"
        );
    }

    tracing::info!("Waiting for background tasks to finish...");
    let _ = recovery_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
