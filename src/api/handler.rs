use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::auth::{hash_password, verify_password, AuthUser, JwtService};
use super::models::*;
use crate::{
    error::{AppError, AppResult, AuthError},
    ledger::{models::SubmitOutcome, LoyaltyStore},
    middleware::{validate_order_number, ValidatedJson},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LoyaltyStore>,
    pub jwt: JwtService,
}

/// 200 with the token both in `Authorization` and in the body
fn token_response(token: String) -> AppResult<Response> {
    let header = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| AppError::Internal(format!("Unusable token header: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(AUTHORIZATION, header)],
        Json(TokenResponse { token }),
    )
        .into_response())
}

/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CredentialsRequest>,
) -> AppResult<Response> {
    let password = request.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))??;

    let user_id = state.store.create_user(&request.login, &password_hash).await?;
    info!(%user_id, login = %request.login, "✅ User registered");

    token_response(state.jwt.issue_token(user_id)?)
}

/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CredentialsRequest>,
) -> AppResult<Response> {
    let user = state
        .store
        .find_user_by_login(&request.login)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let password = request.password;
    let password_hash = user.password_hash;
    tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))??;

    token_response(state.jwt.issue_token(user.id)?)
}

/// POST /api/user/orders - body is the bare order number
pub async fn submit_order(
    State(state): State<AppState>,
    auth: AuthUser,
    body: String,
) -> AppResult<StatusCode> {
    let number = validate_order_number(&body)?;

    match state.store.submit_order(auth.user_id, &number).await? {
        SubmitOutcome::Accepted => Ok(StatusCode::ACCEPTED),
        SubmitOutcome::AlreadyUploaded => Ok(StatusCode::OK),
    }
}

/// GET /api/user/orders
pub async fn list_orders(State(state): State<AppState>, auth: AuthUser) -> AppResult<Response> {
    let orders = state.store.orders_for_user(auth.user_id).await?;

    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let orders: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(orders).into_response())
}

/// GET /api/user/balance
pub async fn get_balance(State(state): State<AppState>, auth: AuthUser) -> AppResult<Response> {
    let balance = state.store.balance(auth.user_id).await?;
    Ok(Json(balance).into_response())
}

/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(request): ValidatedJson<WithdrawRequest>,
) -> AppResult<StatusCode> {
    let order = validate_order_number(&request.order)?;

    match state.store.debit(auth.user_id, &order, request.sum).await {
        Ok(_) => Ok(StatusCode::OK),
        Err(e) => {
            warn!(user_id = %auth.user_id, %order, sum = %request.sum, "Withdrawal refused: {}", e);
            Err(e)
        }
    }
}

/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Response> {
    let withdrawals = state.store.withdrawals_for_user(auth.user_id).await?;

    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let withdrawals: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(withdrawals).into_response())
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: Utc::now(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::{BalanceLedger, UserStore};
    use crate::ledger::InMemoryLedger;
    use crate::server::create_app;
    use axum::{body::Body, http::Request, Router};
    use http_body_util::BodyExt;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        app: Router,
        ledger: Arc<InMemoryLedger>,
        jwt: JwtService,
    }

    impl TestApp {
        async fn new() -> Self {
            let ledger = Arc::new(InMemoryLedger::new());
            let jwt = JwtService::new("test-secret", 1);
            let app = create_app(AppState {
                store: ledger.clone(),
                jwt: jwt.clone(),
            })
            .await;
            Self { app, ledger, jwt }
        }

        async fn user(&self, login: &str) -> (Uuid, String) {
            let user_id = self.ledger.create_user(login, "unused").await.unwrap();
            (user_id, self.jwt.issue_token(user_id).unwrap())
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }
    }

    fn authed(method: &str, uri: &str, token: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .body(body)
            .unwrap()
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let app = TestApp::new().await;
        let credentials = serde_json::json!({"login": "alice", "password": "pw"});

        let (status, body) = app.send(json_post("/api/user/register", credentials.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].is_string());

        let (status, _) = app.send(json_post("/api/user/register", credentials.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = app.send(json_post("/api/user/login", credentials)).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, _) = app
            .send(authed("GET", "/api/user/balance", &token, Body::empty()))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .send(json_post(
                "/api/user/login",
                serde_json::json!({"login": "alice", "password": "wrong"}),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_credentials_are_bad_request() {
        let app = TestApp::new().await;

        let (status, _) = app
            .send(json_post(
                "/api/user/register",
                serde_json::json!({"login": "", "password": "pw"}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(json_post("/api/user/login", serde_json::json!({"login": "bob"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let app = TestApp::new().await;

        let request = Request::builder()
            .uri("/api/user/orders")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.send(request).await.0, StatusCode::UNAUTHORIZED);

        let request = authed("GET", "/api/user/balance", "garbage", Body::empty());
        assert_eq!(app.send(request).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_order_submission_statuses() {
        let app = TestApp::new().await;
        let (_, alice) = app.user("alice").await;
        let (_, bob) = app.user("bob").await;

        let submit = |token: &str, number: &str| {
            authed("POST", "/api/user/orders", token, Body::from(number.to_string()))
        };

        assert_eq!(app.send(submit(&alice, "79927398713")).await.0, StatusCode::ACCEPTED);
        assert_eq!(app.send(submit(&alice, "79927398713")).await.0, StatusCode::OK);
        assert_eq!(app.send(submit(&bob, "79927398713")).await.0, StatusCode::CONFLICT);
        assert_eq!(
            app.send(submit(&alice, "79927398710")).await.0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(app.send(submit(&alice, "abc")).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_order_list_is_empty_then_filled() {
        let app = TestApp::new().await;
        let (_, token) = app.user("alice").await;

        let (status, _) = app
            .send(authed("GET", "/api/user/orders", &token, Body::empty()))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        app.send(authed(
            "POST",
            "/api/user/orders",
            &token,
            Body::from("12345678903"),
        ))
        .await;

        let (status, body) = app
            .send(authed("GET", "/api/user/orders", &token, Body::empty()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["number"], "12345678903");
        assert_eq!(body[0]["status"], "NEW");
        assert!(body[0].get("accrual").is_none());
    }

    #[tokio::test]
    async fn test_withdrawal_flow() {
        let app = TestApp::new().await;
        let (user_id, token) = app.user("alice").await;
        app.ledger.credit(user_id, dec!(500)).await.unwrap();

        let withdraw = |sum: serde_json::Value| {
            let mut request = authed(
                "POST",
                "/api/user/balance/withdraw",
                &token,
                Body::from(serde_json::json!({"order": "2377225624", "sum": sum}).to_string()),
            );
            request.headers_mut().insert(
                "content-type",
                HeaderValue::from_static("application/json"),
            );
            request
        };

        let (status, _) = app.send(withdraw(serde_json::json!(500))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let (status, _) = app.send(withdraw(serde_json::json!(0))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .send(authed(
                "GET",
                "/api/user/withdrawals",
                &token,
                Body::empty(),
            ))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app.send(withdraw(serde_json::json!(499.5))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .send(authed("GET", "/api/user/balance", &token, Body::empty()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"current": 0.5, "withdrawn": 499.5}));

        let (status, body) = app
            .send(authed(
                "GET",
                "/api/user/withdrawals",
                &token,
                Body::empty(),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["order"], "2377225624");
        assert_eq!(body[0]["sum"], 499.5);
    }

    #[tokio::test]
    async fn test_withdrawal_with_bad_order_number() {
        let app = TestApp::new().await;
        let (user_id, token) = app.user("alice").await;
        app.ledger.credit(user_id, dec!(100)).await.unwrap();

        let mut request = authed(
            "POST",
            "/api/user/balance/withdraw",
            &token,
            Body::from(r#"{"order": "2377225625", "sum": 10}"#),
        );
        request
            .headers_mut()
            .insert("content-type", HeaderValue::from_static("application/json"));

        assert_eq!(app.send(request).await.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(app.ledger.balance(user_id).await.unwrap().current, dec!(100));
    }

    #[tokio::test]
    async fn test_withdrawal_without_order_is_bad_request() {
        let app = TestApp::new().await;
        let (user_id, token) = app.user("alice").await;
        app.ledger.credit(user_id, dec!(100)).await.unwrap();

        let mut request = authed(
            "POST",
            "/api/user/balance/withdraw",
            &token,
            Body::from(r#"{"order": "", "sum": 10}"#),
        );
        request
            .headers_mut()
            .insert("content-type", HeaderValue::from_static("application/json"));

        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("order"));
        assert_eq!(app.ledger.balance(user_id).await.unwrap().current, dec!(100));
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = TestApp::new().await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
