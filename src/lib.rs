pub mod accrual;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ledger;
pub mod middleware;
pub mod reconciliation;
pub mod server;
