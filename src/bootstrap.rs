use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{
    accrual::HttpAccrualClient,
    api::{auth::JwtService, handler::AppState},
    config::{Config, DEFAULT_SECRET_KEY},
    error::AppResult,
    ledger::LedgerRepository,
    reconciliation::{ReconciliationConfig, ReconciliationScheduler},
};

pub type Scheduler = ReconciliationScheduler<LedgerRepository, HttpAccrualClient>;

/// Connect, migrate and wire the HTTP state and the reconciliation scheduler
/// around one shared ledger.
pub async fn initialize_app(config: &Config) -> AppResult<(AppState, Scheduler)> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_uri, config.max_db_connections).await?;
    let ledger = Arc::new(LedgerRepository::new(pool));

    let accrual_client = Arc::new(HttpAccrualClient::new(
        &config.accrual_system_address,
        config.accrual_timeout(),
    )?);
    info!(
        "✅ Accrual client configured for {}",
        config.accrual_system_address
    );

    if config.secret_key == DEFAULT_SECRET_KEY {
        warn!("⚠️ SECRET_KEY not set, using the insecure development key");
    }

    let state = AppState {
        store: ledger.clone(),
        jwt: JwtService::new(&config.secret_key, config.token_ttl_hours),
    };

    let scheduler = ReconciliationScheduler::new(
        ReconciliationConfig {
            poll_interval: config.poll_interval(),
        },
        ledger,
        accrual_client,
    );

    Ok((state, scheduler))
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
