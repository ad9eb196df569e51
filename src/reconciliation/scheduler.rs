// Reconciliation Scheduler - converges local orders with the accrual authority
//
// Cycle: Listing -> FanOut -> Waiting -> Listing ...
// - Listing re-reads every unresolved order from the store (nothing is cached)
// - FanOut queries the authority once per order, all concurrently, then joins
// - Waiting sleeps for the poll interval, stretched by any rate-limit signal
//
// Store failures and per-order failures are logged and retried next cycle.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accrual::{AccrualClient, AccrualOutcome};
use crate::error::AppResult;
use crate::ledger::models::{OrderUpdate, UnresolvedOrder};
use crate::ledger::store::OrderStore;

/// Reconciliation schedule configuration
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Pause between the end of one cycle and the start of the next
    pub poll_interval: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub polled: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub pending: usize,
    pub failed: usize,
    pub credited: Decimal,
    /// Largest wait any rate-limited answer asked for
    pub rate_limit: Option<Duration>,
}

impl CycleSummary {
    fn record(&mut self, result: OrderResult) {
        match result {
            OrderResult::Updated { credited } => {
                self.updated += 1;
                self.credited += credited;
            }
            OrderResult::Unchanged => self.unchanged += 1,
            OrderResult::Pending => self.pending += 1,
            OrderResult::RateLimited(wait) => {
                self.rate_limit = Some(self.rate_limit.map_or(wait, |current| current.max(wait)));
            }
            OrderResult::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderResult {
    Updated { credited: Decimal },
    Unchanged,
    Pending,
    RateLimited(Duration),
    Failed,
}

/// Reconciliation scheduler - polls the accrual authority for every unresolved order
pub struct ReconciliationScheduler<S, C> {
    config: ReconciliationConfig,
    store: Arc<S>,
    client: Arc<C>,
}

impl<S, C> ReconciliationScheduler<S, C>
where
    S: OrderStore + 'static,
    C: AccrualClient + 'static,
{
    pub fn new(config: ReconciliationConfig, store: Arc<S>, client: Arc<C>) -> Self {
        Self {
            config,
            store,
            client,
        }
    }

    /// Start the scheduler (runs in background until `cancel` fires)
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Self::new(
            self.config.clone(),
            self.store.clone(),
            self.client.clone(),
        );

        tokio::spawn(async move { scheduler.run(cancel).await })
    }

    /// Cycle until cancelled.
    ///
    /// Cancellation is observed before Listing and during Waiting, never in the
    /// middle of a fan-out, so in-flight order updates always complete.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "⏰ Reconciliation scheduler started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wait = match self.run_cycle().await {
                Ok(summary) => {
                    if summary.polled > 0 {
                        info!(
                            polled = summary.polled,
                            updated = summary.updated,
                            pending = summary.pending,
                            failed = summary.failed,
                            credited = %summary.credited,
                            "✓ Reconciliation cycle completed"
                        );
                    }
                    self.next_wait(&summary)
                }
                Err(e) => {
                    error!("❌ Failed to list unresolved orders: {}", e);
                    self.config.poll_interval
                }
            };

            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("🛑 Reconciliation scheduler stopped");
    }

    /// One Listing + FanOut pass.
    ///
    /// Only a Listing failure is returned as an error; per-order failures are
    /// counted in the summary.
    pub async fn run_cycle(&self) -> AppResult<CycleSummary> {
        let orders = self.store.list_unresolved_orders().await?;

        let mut summary = CycleSummary {
            polled: orders.len(),
            ..Default::default()
        };

        if orders.is_empty() {
            return Ok(summary);
        }

        debug!(count = orders.len(), "🔄 Polling accrual authority");

        let mut tasks = JoinSet::new();
        for order in orders {
            let store = self.store.clone();
            let client = self.client.clone();
            tasks.spawn(async move { reconcile_order(store.as_ref(), client.as_ref(), order).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => summary.record(result),
                Err(e) => {
                    error!("❌ Reconciliation task aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    fn next_wait(&self, summary: &CycleSummary) -> Duration {
        match summary.rate_limit {
            Some(wait) => {
                warn!(
                    retry_after_secs = wait.as_secs(),
                    "⚠️ Accrual authority rate limit hit, backing off"
                );
                wait.max(self.config.poll_interval)
            }
            None => self.config.poll_interval,
        }
    }
}

async fn reconcile_order<S, C>(store: &S, client: &C, order: UnresolvedOrder) -> OrderResult
where
    S: OrderStore + ?Sized,
    C: AccrualClient + ?Sized,
{
    match client.fetch_accrual(&order.number).await {
        AccrualOutcome::Accepted { status, accrual } => {
            if status == order.status {
                return OrderResult::Unchanged;
            }

            match store.update_order(&order.number, status, accrual).await {
                Ok(OrderUpdate::Applied { user_id, credited }) => {
                    info!(
                        order = %order.number,
                        %user_id,
                        status = %status,
                        credited = %credited,
                        "Order status updated"
                    );
                    OrderResult::Updated { credited }
                }
                Ok(OrderUpdate::AlreadyResolved) => OrderResult::Unchanged,
                Err(e) => {
                    error!(order = %order.number, "❌ Failed to apply accrual: {}", e);
                    OrderResult::Failed
                }
            }
        }
        AccrualOutcome::NotYetRegistered => {
            debug!(order = %order.number, "Order not registered by accrual authority yet");
            OrderResult::Pending
        }
        AccrualOutcome::RateLimited { retry_after } => OrderResult::RateLimited(retry_after),
        AccrualOutcome::TransientFailure { reason } => {
            warn!(order = %order.number, %reason, "Accrual query failed, will retry");
            OrderResult::Failed
        }
    }
}
