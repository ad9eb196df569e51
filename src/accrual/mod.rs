// Accrual authority client
pub mod client;
pub mod models;

pub use client::{AccrualClient, HttpAccrualClient, DEFAULT_RETRY_AFTER};
pub use models::AccrualOutcome;
