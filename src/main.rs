use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use contact_outbox::config::Settings;
use contact_outbox::endpoint::{create_app, EndpointState};
use contact_outbox::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_telemetry(&settings.log)?;
    tracing::info!("Configuration loaded");

    let state = EndpointState::from_settings(&settings)?;
    tracing::info!(
        latency_ms = settings.mock.latency_ms,
        failure_rate = state.failure_rate,
        "Mock endpoint state initialized"
    );

    let app = create_app(state);

    // Start server
    let addr = settings.mock_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Mock endpoint listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
