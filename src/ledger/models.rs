use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Local order status
///
/// `Invalid` and `Processed` are terminal: once an order reaches either of them
/// its status and accrual never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(AppError::Internal(format!("Unknown order status: {}", other))),
        }
    }
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

/// Raw `orders` row, status still in its text form
#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub number: String,
    pub user_id: Uuid,
    pub status: String,
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            number: row.number,
            user_id: row.user_id,
            status: row.status.parse()?,
            accrual: row.accrual,
            uploaded_at: row.uploaded_at,
        })
    }
}

/// An order that still awaits a final answer from the accrual authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedOrder {
    pub number: String,
    pub status: OrderStatus,
}

/// Result of applying an authoritative status to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderUpdate {
    /// Status written; `credited` is the amount added to the owner's balance
    /// in the same transaction (zero when nothing was credited).
    Applied { user_id: Uuid, credited: Decimal },
    /// The order was already terminal; nothing changed.
    AlreadyResolved,
}

/// Result of a user submitting an order number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    AlreadyUploaded,
}

/// User entity
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
}

/// Aggregate balance counters of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, FromRow)]
pub struct UserBalance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// Append-only audit record of a debit
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: Uuid,
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}
