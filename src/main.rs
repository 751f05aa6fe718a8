use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use upgrade_gateway::auth::{AccountabilityResolver, JwtResolver};
use upgrade_gateway::config::Settings;
use upgrade_gateway::filter::FilterPipeline;
use upgrade_gateway::ratelimit::RateLimitFilter;
use upgrade_gateway::server::{create_app, AppState, UpgradeListener};
use upgrade_gateway::tasks::HeartbeatTask;
use upgrade_gateway::telemetry::init_telemetry;
use upgrade_gateway::websocket::{run_session, UpgradeController};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;

    // Keep the guard alive so pending spans are flushed on exit
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(mode = settings.socket.auth.mode.as_str(), "Configuration loaded");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let resolver: Arc<dyn AccountabilityResolver> = Arc::new(JwtResolver::new(&settings.jwt));

    // Upgrade filters
    let filters = FilterPipeline::new();
    let mut ratelimit_handle = None;
    if settings.ratelimit.enabled {
        let limiter = Arc::new(RateLimitFilter::new(settings.ratelimit.clone()));
        ratelimit_handle = Some(limiter.spawn_cleanup(shutdown_tx.subscribe()));
        filters.register(limiter);
        tracing::info!(
            connections_per_minute = settings.ratelimit.connections_per_minute,
            burst = settings.ratelimit.burst,
            "Connection rate limiting enabled"
        );
    }

    let (controller, mut accepted) =
        UpgradeController::new(settings.socket.clone(), resolver.clone(), filters);

    // Application loop for accepted connections
    let session_resolver = resolver.clone();
    let session_handle = tokio::spawn(async move {
        while let Some(conn) = accepted.recv().await {
            tokio::spawn(run_session(conn, session_resolver.clone()));
        }
    });

    // Start heartbeat task in background
    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        controller.registry().clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(heartbeat_task.run());

    let addr = settings.server_addr();
    let state = AppState::new(settings.clone(), controller.clone());
    let listener = Arc::new(UpgradeListener::new(create_app(state), &settings.server));
    listener.bind(controller)?;

    let tcp = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    listener
        .clone()
        .serve(tcp, shutdown_signal_handler(shutdown_tx))
        .await?;

    let terminated = listener.terminate_all();
    tracing::info!(terminated, "Closed open connections");

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    session_handle.abort();
    let _ = heartbeat_handle.await;
    if let Some(handle) = ratelimit_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    // Stop background tasks
    let _ = shutdown_tx.send(());
}
