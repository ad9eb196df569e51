use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::{
    Order, OrderStatus, OrderUpdate, SubmitOutcome, UnresolvedOrder, User, UserBalance,
    Withdrawal,
};
use crate::error::AppResult;

/// Order records and their reconciliation status.
///
/// Only the reconciliation scheduler calls [`OrderStore::update_order`]; the
/// request layer only creates orders and reads them back.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Every order whose status is not terminal, read fresh on each call.
    async fn list_unresolved_orders(&self) -> AppResult<Vec<UnresolvedOrder>>;

    /// Atomically write `status` and `accrual`.
    ///
    /// When `status` is `PROCESSED` and `accrual > 0` the owner's balance is
    /// credited in the same transaction. An order that is already terminal is
    /// left alone and reported as [`OrderUpdate::AlreadyResolved`].
    async fn update_order(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> AppResult<OrderUpdate>;

    async fn submit_order(&self, user_id: Uuid, number: &str) -> AppResult<SubmitOutcome>;

    /// Orders of one user, newest upload first.
    async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>>;
}

/// The per-user balance ledger.
///
/// `credit` and `debit` are the only ways a balance changes.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn credit(&self, user_id: Uuid, amount: Decimal) -> AppResult<()>;

    /// Withdraw `amount` against `order_number`.
    ///
    /// Rejected with `InsufficientFunds` when the resulting balance would be
    /// zero or negative.
    async fn debit(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal>;

    async fn balance(&self, user_id: Uuid) -> AppResult<UserBalance>;

    /// Withdrawals of one user, newest first.
    async fn withdrawals_for_user(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, login: &str, password_hash: &str) -> AppResult<Uuid>;

    async fn find_user_by_login(&self, login: &str) -> AppResult<Option<User>>;

    async fn ping(&self) -> AppResult<()>;
}

/// Everything the HTTP layer needs from persistence
pub trait LoyaltyStore: OrderStore + BalanceLedger + UserStore {}

impl<T> LoyaltyStore for T where T: OrderStore + BalanceLedger + UserStore {}

pub(crate) fn ensure_positive_debit(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(crate::error::LedgerError::InvalidAmount(format!(
            "withdrawal sum must be positive, got {}",
            amount
        ))
        .into());
    }
    // Balances are kept in hundredths
    if amount.normalize().scale() > 2 {
        return Err(crate::error::LedgerError::InvalidAmount(format!(
            "withdrawal sum has more than two decimal places: {}",
            amount
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn ensure_non_negative_credit(amount: Decimal) -> AppResult<()> {
    if amount < Decimal::ZERO {
        return Err(crate::error::LedgerError::InvalidAmount(format!(
            "credit must not be negative, got {}",
            amount
        ))
        .into());
    }
    Ok(())
}
