use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::store::{
    ensure_non_negative_credit, ensure_positive_debit, BalanceLedger, OrderStore, UserStore,
};
use crate::error::{AppError, AppResult, AuthError, LedgerError, OrderError};

/// Ledger repository - THE source of truth for orders and balances
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add `amount` to a balance inside an open transaction.
    ///
    /// The increment happens in SQL so concurrent credits to the same user
    /// never overwrite each other.
    async fn credit_in_tx(
        conn: &mut PgConnection,
        user_id: Uuid,
        amount: Decimal,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET balance = balance + $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound(user_id).into());
        }

        Ok(())
    }
}

#[async_trait]
impl OrderStore for LedgerRepository {
    async fn list_unresolved_orders(&self) -> AppResult<Vec<UnresolvedOrder>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT number, status
            FROM orders
            WHERE status NOT IN ('PROCESSED', 'INVALID')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(number, status)| -> AppResult<UnresolvedOrder> {
                Ok(UnresolvedOrder {
                    number,
                    status: status.parse()?,
                })
            })
            .collect()
    }

    async fn update_order(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> AppResult<OrderUpdate> {
        ensure_non_negative_credit(accrual)?;

        let accrual = if status == OrderStatus::Processed {
            accrual
        } else {
            Decimal::ZERO
        };

        let mut tx = self.pool.begin().await?;

        // The status guard makes terminal orders absorbing: a redundant
        // PROCESSED observation matches no row and cannot credit twice.
        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3, updated_at = NOW()
            WHERE number = $1 AND status NOT IN ('PROCESSED', 'INVALID')
            RETURNING user_id
            "#,
        )
        .bind(number)
        .bind(status.as_str())
        .bind(accrual)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT number FROM orders WHERE number = $1")
                    .bind(number)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return match exists {
                Some(_) => {
                    debug!(order = %number, "Order already resolved, update skipped");
                    Ok(OrderUpdate::AlreadyResolved)
                }
                None => Err(OrderError::NotFound(number.to_string()).into()),
            };
        };

        let credited = if status == OrderStatus::Processed && accrual > Decimal::ZERO {
            Self::credit_in_tx(&mut tx, user_id, accrual).await?;
            accrual
        } else {
            Decimal::ZERO
        };

        tx.commit().await?;

        Ok(OrderUpdate::Applied { user_id, credited })
    }

    async fn submit_order(&self, user_id: Uuid, number: &str) -> AppResult<SubmitOutcome> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO orders (number, user_id, status)
            VALUES ($1, $2, 'NEW')
            ON CONFLICT (number) DO NOTHING
            RETURNING user_id
            "#,
        )
        .bind(number)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            info!(order = %number, %user_id, "Order registered");
            return Ok(SubmitOutcome::Accepted);
        }

        let owner: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM orders WHERE number = $1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        match owner {
            Some(owner) if owner == user_id => Ok(SubmitOutcome::AlreadyUploaded),
            Some(_) => Err(OrderError::OwnedByAnotherUser(number.to_string()).into()),
            None => Err(AppError::Internal(format!(
                "Order {} conflicted on insert but is missing",
                number
            ))),
        }
    }

    async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }
}

#[async_trait]
impl BalanceLedger for LedgerRepository {
    async fn credit(&self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        ensure_non_negative_credit(amount)?;

        let mut conn = self.pool.acquire().await?;
        Self::credit_in_tx(&mut conn, user_id, amount).await
    }

    async fn debit(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal> {
        ensure_positive_debit(amount)?;

        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent withdrawals of the same user.
        let balance = sqlx::query_as::<_, UserBalance>(
            r#"
            SELECT balance AS current, withdrawn
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::UserNotFound(user_id))?;

        if balance.current - amount <= Decimal::ZERO {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientFunds {
                required: amount.to_string(),
                available: balance.current.to_string(),
            }
            .into());
        }

        sqlx::query(
            r#"
            UPDATE users
            SET balance = balance - $2, withdrawn = withdrawn + $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (user_id, order_number, sum)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, order_number, sum, processed_at
            "#,
        )
        .bind(user_id)
        .bind(order_number)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(%user_id, order = %order_number, sum = %amount, "Withdrawal committed");
        Ok(withdrawal)
    }

    async fn balance(&self, user_id: Uuid) -> AppResult<UserBalance> {
        let balance = sqlx::query_as::<_, UserBalance>(
            "SELECT balance AS current, withdrawn FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::UserNotFound(user_id))?;

        Ok(balance)
    }

    async fn withdrawals_for_user(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT id, user_id, order_number, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}

#[async_trait]
impl UserStore for LedgerRepository {
    async fn create_user(&self, login: &str, password_hash: &str) -> AppResult<Uuid> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO users (id, login, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (login) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(login)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;

        id.ok_or_else(|| AuthError::LoginTaken.into())
    }

    async fn find_user_by_login(&self, login: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, login, password_hash FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
