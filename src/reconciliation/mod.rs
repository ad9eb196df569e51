// Background reconciliation of orders against the accrual authority
pub mod scheduler;

pub use scheduler::{CycleSummary, ReconciliationConfig, ReconciliationScheduler};
