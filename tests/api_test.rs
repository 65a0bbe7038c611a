//! Integration tests for API endpoints.
//!
//! Requests go through the real router, services and SQL repositories; only
//! the database is replaced by the scripted connection double.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use ledger_service::api::{create_router, AppState};
use ledger_service::infra::db::testing::{settle, Command, ScriptedConnector};
use ledger_service::infra::{PoolOptions, UnitOfWorkFactory};
use ledger_service::services::Services;

// =============================================================================
// Helpers
// =============================================================================

struct TestApp {
    router: Router,
    uow: UnitOfWorkFactory,
    connector: ScriptedConnector,
}

impl TestApp {
    fn new(max_connections: u32) -> Self {
        Self::with_timeout(max_connections, Duration::from_secs(5))
    }

    fn with_timeout(max_connections: u32, timeout: Duration) -> Self {
        let connector = ScriptedConnector::new();
        let uow = UnitOfWorkFactory::new(connector.provider(PoolOptions::new(max_connections)));
        let state = AppState::from_container(uow.clone(), &Services::with_stores())
            .with_request_timeout(timeout);

        Self {
            router: create_router(state),
            uow,
            connector,
        }
    }

    async fn assert_no_leaks(&self) {
        let status = settle(self.uow.provider()).await;
        assert_eq!(status.in_use, 0, "pooled connection leaked: {:?}", status);
        assert_eq!(self.uow.active_sessions(), 0, "session leaked");
    }
}

fn account_row(id: Uuid, owner: &str, balance: i64) -> Value {
    let now = Utc::now();
    json!({
        "id": id,
        "owner": owner,
        "balance": balance,
        "version": 3,
        "created_at": now,
        "updated_at": now,
    })
}

fn get(uri: impl AsRef<str>) -> Request<Body> {
    Request::builder()
        .uri(uri.as_ref())
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: impl AsRef<str>, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri.as_ref())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Request lifecycle
// =============================================================================

#[tokio::test]
async fn test_write_request_commits_and_restores_idle() {
    let app = TestApp::new(2);
    // Owner lookup finds nothing; the insert uses the default reply.
    app.connector.push_empty();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/accounts",
            json!({ "owner": "alice", "initial_balance": 1000 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["owner"], "alice");
    assert_eq!(body["balance"], 1000);

    assert_eq!(app.connector.begins(), 1);
    assert_eq!(app.connector.commits(), 1);
    assert_eq!(app.connector.rollbacks(), 0);
    app.assert_no_leaks().await;
    assert_eq!(app.uow.provider().status().idle, 1);
}

#[tokio::test]
async fn test_missing_account_rolls_back_with_404() {
    let app = TestApp::new(2);
    app.connector.push_empty();

    let response = app
        .router
        .clone()
        .oneshot(get(format!("/accounts/{}", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    assert_eq!(app.connector.commits(), 0);
    assert_eq!(app.connector.rollbacks(), 1);
    app.assert_no_leaks().await;
    assert_eq!(app.uow.provider().status().idle, 1);
}

#[tokio::test]
async fn test_second_request_waits_for_the_only_connection() {
    let app = TestApp::new(1);
    app.connector.set_latency(Duration::from_millis(20));
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    app.connector.push_row(account_row(first, "carol", 10));
    app.connector.push_row(account_row(second, "dave", 20));

    let (c, d) = tokio::join!(
        app.router.clone().oneshot(get(format!("/accounts/{}", first))),
        app.router.clone().oneshot(get(format!("/accounts/{}", second))),
    );

    let c = c.unwrap();
    let d = d.unwrap();
    assert_eq!(c.status(), StatusCode::OK);
    assert_eq!(d.status(), StatusCode::OK);
    assert_eq!(body_json(c).await["owner"], "carol");
    assert_eq!(body_json(d).await["owner"], "dave");

    // One physical connection, and the second BEGIN only after the first COMMIT.
    assert_eq!(app.connector.connections_opened(), 1);
    let commands: Vec<Command> = app.connector.log().into_iter().map(|e| e.command).collect();
    let first_commit = commands
        .iter()
        .position(|c| matches!(c, Command::Commit))
        .unwrap();
    let second_begin = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Command::Begin(_)))
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    assert!(first_commit < second_begin);
    app.assert_no_leaks().await;
}

#[tokio::test]
async fn test_read_endpoints_use_read_only_transactions() {
    let app = TestApp::new(1);
    let id = Uuid::new_v4();
    app.connector.push_row(account_row(id, "erin", 0));

    let response = app
        .router
        .clone()
        .oneshot(get(format!("/accounts/{}", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let read_only = app
        .connector
        .log()
        .into_iter()
        .any(|e| matches!(e.command, Command::Begin(options) if options.read_only));
    assert!(read_only);
    app.assert_no_leaks().await;
}

#[tokio::test]
async fn test_list_accounts_returns_one_page() {
    let app = TestApp::new(1);
    app.connector.push_row(json!({ "count": 3 }));
    app.connector.push_rows([
        account_row(Uuid::new_v4(), "ivan", 1),
        account_row(Uuid::new_v4(), "judy", 2),
    ]);

    let response = app
        .router
        .clone()
        .oneshot(get("/accounts?page=1&per_page=2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["total_pages"], 2);
    assert_eq!(body["meta"]["has_next"], true);
    assert_eq!(app.connector.commits(), 1);
    app.assert_no_leaks().await;
}

#[tokio::test]
async fn test_request_timeout_rolls_back() {
    let app = TestApp::with_timeout(1, Duration::from_millis(20));
    app.connector.set_latency(Duration::from_millis(500));

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            format!("/accounts/{}/deposit", Uuid::new_v4()),
            json!({ "amount": 100 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    app.assert_no_leaks().await;
    assert_eq!(app.connector.commits(), 0);
    assert_eq!(app.connector.rollbacks(), 1);
}

// =============================================================================
// Error mapping
// =============================================================================

#[tokio::test]
async fn test_invalid_body_never_touches_the_pool() {
    let app = TestApp::new(1);

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/transfers",
            json!({
                "from_account": Uuid::new_v4(),
                "to_account": Uuid::new_v4(),
                "amount": 0,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(app.connector.begins(), 0);
}

#[tokio::test]
async fn test_insufficient_funds_rolls_back_transfer() {
    let app = TestApp::new(1);
    let from = Uuid::new_v4();
    let to = Uuid::new_v4();
    let [low, high] = if from < to { [from, to] } else { [to, from] };
    // Accounts are locked in id order.
    let row = |id: Uuid| {
        if id == from {
            account_row(from, "frank", 50)
        } else {
            account_row(to, "grace", 0)
        }
    };
    app.connector.push_row(row(low));
    app.connector.push_row(row(high));

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/transfers",
            json!({ "from_account": from, "to_account": to, "amount": 500 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.connector.commits(), 0);
    assert_eq!(app.connector.rollbacks(), 1);
    assert!(app
        .connector
        .statements()
        .iter()
        .all(|sql| !sql.starts_with("UPDATE") && !sql.starts_with("INSERT")));
    app.assert_no_leaks().await;
}

#[tokio::test]
async fn test_concurrent_modification_is_409() {
    let app = TestApp::new(1);
    let id = Uuid::new_v4();
    app.connector.push_row(account_row(id, "heidi", 100));
    // The version-checked update matches no row.
    app.connector.push_exec(0);

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            format!("/accounts/{}/withdraw", id),
            json!({ "amount": 10 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "STALE_STATE");
    assert_eq!(app.connector.commits(), 0);
    assert_eq!(app.connector.rollbacks(), 1);
    app.assert_no_leaks().await;
}

#[tokio::test]
async fn test_exhausted_pool_is_503() {
    let connector = ScriptedConnector::new();
    let uow = UnitOfWorkFactory::new(
        connector.provider(PoolOptions::new(1).acquire_timeout(Duration::from_millis(20))),
    );
    let router = create_router(AppState::from_container(uow.clone(), &Services::with_stores()));

    let held = uow.begin().await.unwrap();
    let response = router
        .oneshot(get(format!("/accounts/{}", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"]["code"], "SERVICE_UNAVAILABLE");

    held.close().await;
    assert_eq!(settle(uow.provider()).await.in_use, 0);
    assert_eq!(uow.active_sessions(), 0);
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_reports_pool_status() {
    let app = TestApp::new(3);

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["pool"]["capacity"], 3);
    assert_eq!(body["active_sessions"], 0);
    app.assert_no_leaks().await;
}
