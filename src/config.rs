use clap::Parser;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const DEFAULT_SECRET_KEY: &str = "insecure-dev-secret";

/// Command-line flags; each one overrides its environment variable
#[derive(Debug, Default, Parser)]
#[command(name = "loyalty-backend", about = "Loyalty points accrual and balance service")]
pub struct Cli {
    /// Address and port to serve HTTP on, e.g. localhost:8080
    #[arg(short = 'a', long = "run-address")]
    pub run_address: Option<String>,

    /// Postgres connection string
    #[arg(short = 'd', long = "database-uri")]
    pub database_uri: Option<String>,

    /// Base address of the accrual authority, e.g. http://localhost:8081
    #[arg(short = 'r', long = "accrual-address")]
    pub accrual_system_address: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_address: String,
    pub database_uri: String,
    pub accrual_system_address: String,
    pub secret_key: String,
    pub poll_interval_secs: u64,
    pub accrual_timeout_secs: u64,
    pub token_ttl_hours: i64,
    pub max_db_connections: u32,
}

impl Config {
    /// Defaults, then process environment, then flags
    pub fn load(cli: &Cli) -> AppResult<Self> {
        Self::from_sources(config::Environment::default(), cli)
    }

    fn from_sources(env: config::Environment, cli: &Cli) -> AppResult<Self> {
        let config: Config = config::Config::builder()
            .set_default("run_address", "localhost:8080")?
            .set_default("database_uri", "")?
            .set_default("accrual_system_address", "http://localhost:8081")?
            .set_default("secret_key", DEFAULT_SECRET_KEY)?
            .set_default("poll_interval_secs", 10)?
            .set_default("accrual_timeout_secs", 5)?
            .set_default("token_ttl_hours", 24)?
            .set_default("max_db_connections", 10)?
            .add_source(env.try_parsing(true))
            .set_override_option("run_address", cli.run_address.clone())?
            .set_override_option("database_uri", cli.database_uri.clone())?
            .set_override_option(
                "accrual_system_address",
                cli.accrual_system_address.clone(),
            )?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.database_uri.trim().is_empty() {
            return Err(AppError::Config(
                "DATABASE_URI (or -d) must be set".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(AppError::Config(
                "POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn accrual_timeout(&self) -> Duration {
        Duration::from_secs(self.accrual_timeout_secs)
    }
}
