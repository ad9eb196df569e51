use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::models::{AccrualOutcome, AccrualResponse};
use crate::error::AppResult;

/// Wait applied when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// One request/response exchange with the accrual authority.
///
/// Implementations issue exactly one call and never retry; pacing belongs to the
/// reconciliation scheduler.
#[async_trait]
pub trait AccrualClient: Send + Sync {
    async fn fetch_accrual(&self, order_number: &str) -> AccrualOutcome;
}

/// reqwest-backed client for `GET {base}/api/orders/{number}`
#[derive(Clone)]
pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };

        Ok(Self { client, base_url })
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn fetch_accrual(&self, order_number: &str) -> AccrualOutcome {
        let response = match self.client.get(self.order_url(order_number)).send().await {
            Ok(response) => response,
            Err(e) => {
                return AccrualOutcome::TransientFailure {
                    reason: format!("request failed: {}", e),
                }
            }
        };

        let status = response.status();
        debug!(order = %order_number, status = status.as_u16(), "Accrual authority answered");

        match status {
            StatusCode::OK => match response.json::<AccrualResponse>().await {
                Ok(body) => body.into(),
                Err(e) => AccrualOutcome::TransientFailure {
                    reason: format!("unreadable accrual body: {}", e),
                },
            },
            StatusCode::NO_CONTENT => AccrualOutcome::NotYetRegistered,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                AccrualOutcome::RateLimited { retry_after }
            }
            other => AccrualOutcome::TransientFailure {
                reason: format!("unexpected status {}", other),
            },
        }
    }
}

/// Seconds form of `Retry-After`; zero and non-numeric values are unusable.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
