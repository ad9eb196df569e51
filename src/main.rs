use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loyalty_backend::{bootstrap, config, server};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,loyalty_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("🛑 Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting Loyalty Points Backend");

    let cli = config::Cli::parse();
    let config = config::Config::load(&cli)?;

    let (state, scheduler) = bootstrap::initialize_app(&config).await?;

    let cancel = CancellationToken::new();
    let reconciliation = scheduler.start(cancel.clone());

    let app = server::create_app(state).await;

    let server_cancel = cancel.clone();
    let result = server::run_server(app, &config.run_address, async move {
        tokio::select! {
            _ = shutdown_signal() => {},
            _ = server_cancel.cancelled() => {},
        }
    })
    .await;

    // Let the scheduler finish its current fan-out before exiting
    cancel.cancel();
    if let Err(e) = reconciliation.await {
        error!("❌ Reconciliation scheduler panicked: {}", e);
    }

    result?;
    info!("👋 Server stopped");
    Ok(())
}
