//! Integration and unit tests for the Thuvien backend.
//!
//! ## Test Modules
//!
//! - **api_tests**: auth, accounts, catalog and reader endpoints
//! - **circulation_tests**: borrowing, requests, returns, fines and renewals
//! - **payment_tests**: QR payments against a scripted gateway
//! - **jobs_tests**: the daily overdue and reminder run
//! - **error_tests**: error mapping and input validation
//! - **config_tests**: configuration loading and validation
//! - **db_tests**: schema and seeding
//! - **health_api_tests**: probes, metrics and version info
//!
//! Every test gets its own temporary SQLite file.

pub mod api_tests;
pub mod error_tests;
pub mod health_api_tests;
pub mod jobs_tests;
pub mod payment_tests;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, SqlitePool};
use tempfile::NamedTempFile;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::payment::sepay::{BankTransaction, GatewayError, PaymentGateway};
use crate::state::AppState;

pub(crate) const ADMIN_USER: &str = "admin";
pub(crate) const ADMIN_PASS: &str = "admin123";

/// Gateway returning whatever transactions the test pushed.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    txs: Mutex<Vec<BankTransaction>>,
    fail: Mutex<bool>,
}

impl ScriptedGateway {
    pub(crate) fn push(&self, id: &str, amount_in: i64, content: &str) {
        if let Ok(mut txs) = self.txs.lock() {
            txs.push(BankTransaction {
                id: id.to_string(),
                amount_in,
                content: content.to_string(),
                reference: Some(format!("FT{}", id)),
                transaction_date: None,
            });
        }
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        if let Ok(mut f) = self.fail.lock() {
            *f = fail;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn recent_transactions(&self) -> Result<Vec<BankTransaction>, GatewayError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(GatewayError::Timeout(10));
        }
        Ok(self.txs.lock().map(|t| t.clone()).unwrap_or_default())
    }
}

pub(crate) struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    // keeps the database file alive for the test
    _db_file: NamedTempFile,
}

impl TestApp {
    pub(crate) fn db(&self) -> &SqlitePool {
        &self.state.db
    }

    /// Sends one request and returns the status plus the JSON body (`Null` when empty).
    pub(crate) async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub(crate) async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    pub(crate) async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    pub(crate) async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub(crate) async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, Some(token), None).await
    }

    pub(crate) async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(serde_json::json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Failed login attempt arriving over a connection from `peer`.
    pub(crate) async fn login_attempt_from(&self, peer: &str, forwarded_for: Option<&str>) -> StatusCode {
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .extension(ConnectInfo(addr));
        if let Some(xff) = forwarded_for {
            builder = builder.header("x-forwarded-for", xff);
        }
        let body = serde_json::json!({ "username": ADMIN_USER, "password": "wrong-password" });
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.app.clone().oneshot(request).await.unwrap().status()
    }

    pub(crate) async fn admin_token(&self) -> String {
        self.login(ADMIN_USER, ADMIN_PASS).await
    }

    pub(crate) async fn admin_id(&self) -> i64 {
        sqlx::query_scalar("SELECT id FROM accounts WHERE username = ?1")
            .bind(ADMIN_USER)
            .fetch_one(self.db())
            .await
            .unwrap()
    }

    /// Self-registers a reader and returns (token, reader_id).
    pub(crate) async fn register_reader(&self, username: &str) -> (String, i64) {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(serde_json::json!({
                    "username": username,
                    "password": "secret-pass",
                    "full_name": format!("Độc giả {}", username),
                    "email": format!("{}@example.com", username),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        let token = body["token"].as_str().unwrap().to_string();
        let reader_id = body["account"]["reader_id"].as_i64().unwrap();
        (token, reader_id)
    }

    /// Creates a book with `copies` copies and returns (book_id, copy ids).
    pub(crate) async fn create_book(&self, token: &str, title: &str, price: i64, copies: i64) -> (i64, Vec<i64>) {
        let (status, body) = self
            .post("/api/books", token, serde_json::json!({ "title": title, "price": price, "copies": copies }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create book failed: {}", body);
        let book_id = body["id"].as_i64().unwrap();
        let copy_ids = body["copies"].as_array().unwrap().iter().map(|c| c["id"].as_i64().unwrap()).collect();
        (book_id, copy_ids)
    }
}

pub(crate) async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

/// Like [`setup`] but lets the test adjust the configuration first.
pub(crate) async fn setup_with(adjust: impl FnOnce(&mut AppConfig)) -> TestApp {
    build(1, adjust).await
}

/// A pool with several connections, for requests racing each other.
pub(crate) async fn setup_pooled(connections: u32) -> TestApp {
    build(connections, |_| {}).await
}

async fn build(connections: u32, adjust: impl FnOnce(&mut AppConfig)) -> TestApp {
    let db_file = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite:{}", db_file.path().display());
    sqlx::Sqlite::create_database(&db_url).await.unwrap();

    let pool = SqlitePoolOptions::new().max_connections(connections).connect(&db_url).await.unwrap();
    crate::db::init_db(&pool).await.unwrap();

    let mut config = AppConfig::default();
    config.database.url = db_url;
    config.auth.bcrypt_cost = 4;
    adjust(&mut config);

    crate::db::seed(&pool, &config).await.unwrap();

    let gateway = Arc::new(ScriptedGateway::default());
    let state = AppState::with_gateway(pool, config, gateway.clone());
    let app = crate::routes::router(state.clone());

    TestApp { app, state, gateway, _db_file: db_file }
}
