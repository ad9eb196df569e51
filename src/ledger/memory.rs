use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::*;
use super::store::{
    ensure_non_negative_credit, ensure_positive_debit, BalanceLedger, OrderStore, UserStore,
};
use crate::error::{AppResult, AuthError, LedgerError, OrderError};

#[derive(Debug, Default)]
struct LedgerState {
    users: HashMap<Uuid, (User, UserBalance)>,
    orders: HashMap<String, Order>,
    withdrawals: Vec<Withdrawal>,
}

/// In-memory ledger with the same atomicity as the Postgres repository.
///
/// One mutex guards all state, so every operation is a serialized transaction.
/// Used by tests and local tooling; not for production use.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of one order
    pub fn order(&self, number: &str) -> Option<Order> {
        self.state.lock().orders.get(number).cloned()
    }
}

#[async_trait]
impl OrderStore for InMemoryLedger {
    async fn list_unresolved_orders(&self) -> AppResult<Vec<UnresolvedOrder>> {
        let state = self.state.lock();
        Ok(state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .map(|o| UnresolvedOrder {
                number: o.number.clone(),
                status: o.status,
            })
            .collect())
    }

    async fn update_order(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> AppResult<OrderUpdate> {
        ensure_non_negative_credit(accrual)?;

        let mut state = self.state.lock();
        let state = &mut *state;

        let order = state
            .orders
            .get_mut(number)
            .ok_or_else(|| OrderError::NotFound(number.to_string()))?;

        if order.status.is_terminal() {
            return Ok(OrderUpdate::AlreadyResolved);
        }

        let accrual = if status == OrderStatus::Processed {
            accrual
        } else {
            Decimal::ZERO
        };

        let credited = if status == OrderStatus::Processed && accrual > Decimal::ZERO {
            let (_, balance) = state
                .users
                .get_mut(&order.user_id)
                .ok_or(LedgerError::UserNotFound(order.user_id))?;
            balance.current += accrual;
            accrual
        } else {
            Decimal::ZERO
        };

        order.status = status;
        order.accrual = accrual;

        Ok(OrderUpdate::Applied {
            user_id: order.user_id,
            credited,
        })
    }

    async fn submit_order(&self, user_id: Uuid, number: &str) -> AppResult<SubmitOutcome> {
        let mut state = self.state.lock();

        if let Some(existing) = state.orders.get(number) {
            if existing.user_id == user_id {
                return Ok(SubmitOutcome::AlreadyUploaded);
            }
            return Err(OrderError::OwnedByAnotherUser(number.to_string()).into());
        }

        state.orders.insert(
            number.to_string(),
            Order {
                number: number.to_string(),
                user_id,
                status: OrderStatus::New,
                accrual: Decimal::ZERO,
                uploaded_at: Utc::now(),
            },
        );

        Ok(SubmitOutcome::Accepted)
    }

    async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn credit(&self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        ensure_non_negative_credit(amount)?;

        let mut state = self.state.lock();
        let (_, balance) = state
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound(user_id))?;
        balance.current += amount;
        Ok(())
    }

    async fn debit(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal> {
        ensure_positive_debit(amount)?;

        let mut state = self.state.lock();
        let next_id = state.withdrawals.len() as i64 + 1;

        let (_, balance) = state
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound(user_id))?;

        if balance.current - amount <= Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                required: amount.to_string(),
                available: balance.current.to_string(),
            }
            .into());
        }

        balance.current -= amount;
        balance.withdrawn += amount;

        let withdrawal = Withdrawal {
            id: next_id,
            user_id,
            order_number: order_number.to_string(),
            sum: amount,
            processed_at: Utc::now(),
        };
        state.withdrawals.push(withdrawal.clone());

        Ok(withdrawal)
    }

    async fn balance(&self, user_id: Uuid) -> AppResult<UserBalance> {
        let state = self.state.lock();
        state
            .users
            .get(&user_id)
            .map(|(_, balance)| *balance)
            .ok_or_else(|| LedgerError::UserNotFound(user_id).into())
    }

    async fn withdrawals_for_user(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        let state = self.state.lock();
        Ok(state
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for InMemoryLedger {
    async fn create_user(&self, login: &str, password_hash: &str) -> AppResult<Uuid> {
        let mut state = self.state.lock();

        if state.users.values().any(|(user, _)| user.login == login) {
            return Err(AuthError::LoginTaken.into());
        }

        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        };
        let id = user.id;
        state.users.insert(id, (user, UserBalance::default()));

        Ok(id)
    }

    async fn find_user_by_login(&self, login: &str) -> AppResult<Option<User>> {
        let state = self.state.lock();
        Ok(state
            .users
            .values()
            .find(|(user, _)| user.login == login)
            .map(|(user, _)| user.clone()))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn user_with_balance(ledger: &InMemoryLedger, balance: Decimal) -> Uuid {
        let user_id = ledger.create_user("user", "hash").await.unwrap();
        ledger.credit(user_id, balance).await.unwrap();
        user_id
    }

    #[tokio::test]
    async fn test_withdrawing_entire_balance_is_rejected() {
        let ledger = InMemoryLedger::new();
        let user_id = user_with_balance(&ledger, dec!(500)).await;

        let result = ledger.debit(user_id, "2377225624", dec!(500)).await;
        assert!(matches!(
            result,
            Err(AppError::Ledger(LedgerError::InsufficientFunds { .. }))
        ));
        assert_eq!(
            ledger.balance(user_id).await.unwrap(),
            UserBalance { current: dec!(500), withdrawn: Decimal::ZERO }
        );

        ledger.debit(user_id, "2377225624", dec!(499.99)).await.unwrap();
        assert_eq!(
            ledger.balance(user_id).await.unwrap(),
            UserBalance { current: dec!(0.01), withdrawn: dec!(499.99) }
        );
    }

    #[tokio::test]
    async fn test_non_positive_withdrawal_is_rejected() {
        let ledger = InMemoryLedger::new();
        let user_id = user_with_balance(&ledger, dec!(10)).await;

        for amount in [Decimal::ZERO, dec!(-5), dec!(0.001)] {
            let result = ledger.debit(user_id, "2377225624", amount).await;
            assert!(matches!(
                result,
                Err(AppError::Ledger(LedgerError::InvalidAmount(_)))
            ));
        }
        assert_eq!(ledger.balance(user_id).await.unwrap().current, dec!(10));
    }

    #[tokio::test]
    async fn test_balance_equals_credits_minus_debits() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user_id = user_with_balance(&ledger, Decimal::ZERO).await;

        let credits = [dec!(100), dec!(25.50), dec!(0.49), dec!(300)];
        let debits = [dec!(50), dec!(400), dec!(75.99), dec!(1000)];

        let mut expected_withdrawn = Decimal::ZERO;
        for (credit, debit) in credits.iter().zip(debits.iter()) {
            ledger.credit(user_id, *credit).await.unwrap();
            if ledger.debit(user_id, "2377225624", *debit).await.is_ok() {
                expected_withdrawn += *debit;
            }
            let balance = ledger.balance(user_id).await.unwrap();
            assert!(balance.current >= Decimal::ZERO);
        }

        let total_credits: Decimal = credits.iter().sum();
        let balance = ledger.balance(user_id).await.unwrap();
        assert_eq!(balance.withdrawn, expected_withdrawn);
        assert_eq!(balance.current, total_credits - expected_withdrawn);

        let recorded: Decimal = ledger
            .withdrawals_for_user(user_id)
            .await
            .unwrap()
            .iter()
            .map(|w| w.sum)
            .sum();
        assert_eq!(recorded, expected_withdrawn);
    }

    #[tokio::test]
    async fn test_concurrent_credits_are_not_lost() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user_id = user_with_balance(&ledger, Decimal::ZERO).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.credit(user_id, dec!(2)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.balance(user_id).await.unwrap().current, dec!(100));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user_id = user_with_balance(&ledger, dec!(100)).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(user_id, "2377225624", dec!(30)).await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => committed += 1,
                Err(AppError::Ledger(LedgerError::InsufficientFunds { .. })) => {}
                Err(other) => panic!("unexpected debit error: {other}"),
            }
        }

        assert_eq!(committed, 3);
        assert_eq!(
            ledger.balance(user_id).await.unwrap(),
            UserBalance { current: dec!(10), withdrawn: dec!(90) }
        );
        assert_eq!(ledger.withdrawals_for_user(user_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_negative_accrual_update_is_rejected() {
        let ledger = InMemoryLedger::new();
        let user_id = user_with_balance(&ledger, Decimal::ZERO).await;
        ledger.submit_order(user_id, "79927398713").await.unwrap();

        let result = ledger
            .update_order("79927398713", OrderStatus::Processed, dec!(-5))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Ledger(LedgerError::InvalidAmount(_)))
        ));

        let order = ledger.order("79927398713").unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.accrual, Decimal::ZERO);
        assert_eq!(ledger.balance(user_id).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_terminal_orders_are_absorbing() {
        let ledger = InMemoryLedger::new();
        let user_id = user_with_balance(&ledger, Decimal::ZERO).await;
        ledger.submit_order(user_id, "79927398713").await.unwrap();

        let first = ledger
            .update_order("79927398713", OrderStatus::Processed, dec!(100))
            .await
            .unwrap();
        assert_eq!(first, OrderUpdate::Applied { user_id, credited: dec!(100) });

        let again = ledger
            .update_order("79927398713", OrderStatus::Invalid, Decimal::ZERO)
            .await
            .unwrap();
        assert_eq!(again, OrderUpdate::AlreadyResolved);

        let order = ledger.order("79927398713").unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
        assert_eq!(order.accrual, dec!(100));
        assert_eq!(ledger.balance(user_id).await.unwrap().current, dec!(100));
        assert!(ledger.list_unresolved_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_order_never_credits() {
        let ledger = InMemoryLedger::new();
        let user_id = user_with_balance(&ledger, Decimal::ZERO).await;
        ledger.submit_order(user_id, "79927398713").await.unwrap();

        let update = ledger
            .update_order("79927398713", OrderStatus::Invalid, dec!(40))
            .await
            .unwrap();

        assert_eq!(update, OrderUpdate::Applied { user_id, credited: Decimal::ZERO });
        assert_eq!(ledger.balance(user_id).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_update_unknown_order_is_not_found() {
        let ledger = InMemoryLedger::new();
        let result = ledger
            .update_order("12345678903", OrderStatus::Processing, Decimal::ZERO)
            .await;
        assert!(matches!(result, Err(AppError::Order(OrderError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_order_number_has_single_owner() {
        let ledger = InMemoryLedger::new();
        let alice = ledger.create_user("alice", "hash").await.unwrap();
        let bob = ledger.create_user("bob", "hash").await.unwrap();

        assert_eq!(
            ledger.submit_order(alice, "79927398713").await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            ledger.submit_order(alice, "79927398713").await.unwrap(),
            SubmitOutcome::AlreadyUploaded
        );
        assert!(matches!(
            ledger.submit_order(bob, "79927398713").await,
            Err(AppError::Order(OrderError::OwnedByAnotherUser(_)))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_login_is_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.create_user("alice", "hash").await.unwrap();
        assert!(matches!(
            ledger.create_user("alice", "other").await,
            Err(AppError::Auth(AuthError::LoginTaken))
        ));
    }
}
