use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_balance, health_check, list_orders, list_withdrawals, login, register, submit_order,
    withdraw, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/user",
            Router::new()
                // Public auth endpoints
                .route("/register", post(register))
                .route("/login", post(login))
                // Bearer-token endpoints
                .route("/orders", post(submit_order).get(list_orders))
                .route("/balance", get(get_balance))
                .route("/balance/withdraw", post(withdraw))
                .route("/withdrawals", get(list_withdrawals)),
        )
        .layer(CompressionLayer::new())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` resolves, then let in-flight requests finish
pub async fn run_server<F>(app: Router, bind_address: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
