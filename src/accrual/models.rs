use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ledger::models::OrderStatus;

/// Processing stage reported by the accrual authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorityStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AuthorityStatus {
    /// Local status this stage corresponds to
    pub fn to_order_status(self) -> OrderStatus {
        match self {
            AuthorityStatus::Registered | AuthorityStatus::Processing => OrderStatus::Processing,
            AuthorityStatus::Invalid => OrderStatus::Invalid,
            AuthorityStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Body of a `200` answer from `GET /api/orders/{number}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AuthorityStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
}

/// What one query to the accrual authority told us about one order.
///
/// Produced fresh on every poll and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    Accepted {
        status: OrderStatus,
        accrual: Decimal,
    },
    NotYetRegistered,
    RateLimited {
        retry_after: Duration,
    },
    TransientFailure {
        reason: String,
    },
}

impl From<AccrualResponse> for AccrualOutcome {
    fn from(response: AccrualResponse) -> Self {
        let accrual = response.accrual.unwrap_or(Decimal::ZERO).round_dp(2);

        // Accruals are never negative; such an answer is retried next cycle
        if accrual < Decimal::ZERO {
            return AccrualOutcome::TransientFailure {
                reason: format!("negative accrual {} for order {}", accrual, response.order),
            };
        }

        AccrualOutcome::Accepted {
            status: response.status.to_order_status(),
            accrual,
        }
    }
}
