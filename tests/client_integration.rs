//! End-to-end tests for the client against an in-process mock backend.
//!
//! The backend is a small axum app bound to an ephemeral port. It counts
//! hits per route and records the `Authorization` header it receives, so
//! tests can assert on what actually went over the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use rag_client::auth::AuthState;
use rag_client::config::Config;
use rag_client::gateway::Gateway;
use rag_client::models::SearchRequest;
use rag_client::mutation::MutationState;
use rag_client::session::{Session, SessionEvent};
use rag_client::storage::{FileStorage, KeyValueStorage, MemoryStorage};
use rag_client::validate::FeedbackDraft;
use rag_client::{HttpErrorKind, RagClient};
use reqwest::Method;
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Mock backend ───────────────────────────────────────────────────

#[derive(Default)]
struct Backend {
    hits: Mutex<HashMap<String, usize>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    last_search: Mutex<Option<Value>>,
    /// When set, every authenticated route answers 401.
    revoked: AtomicBool,
}

impl Backend {
    fn hits(&self, route: &str) -> usize {
        self.hits.lock().unwrap().get(route).copied().unwrap_or(0)
    }

    fn record(&self, route: &str, headers: &HeaderMap) {
        *self.hits.lock().unwrap().entry(route.to_string()).or_default() += 1;
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        self.auth_headers.lock().unwrap().push(auth);
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        !self.revoked.load(Ordering::SeqCst)
            && headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer tok1")
    }
}

type Reply = (StatusCode, Json<Value>);

fn unauthorized() -> Reply {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Could not validate credentials" })),
    )
}

fn test_user() -> Value {
    json!({
        "id": "u1",
        "email": "user@example.com",
        "name": "Test User",
        "department": "Engineering",
        "access_level": 2
    })
}

async fn login(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    b.record("login", &headers);
    if body["email"] == "user@example.com" && body["password"] == "password123" {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "tok1",
                "token_type": "bearer",
                "user": test_user()
            })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Incorrect email or password" })),
        )
    }
}

async fn logout(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Reply {
    b.record("logout", &headers);
    (StatusCode::OK, Json(json!({ "message": "Successfully logged out" })))
}

async fn history(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    b.record("history", &headers);
    if !b.authorized(&headers) {
        return unauthorized();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let page_size: u32 = params
        .get("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(10);
    (
        StatusCode::OK,
        Json(json!({
            "items": [{
                "query_id": "q1",
                "query": "What is the vacation policy?",
                "answer": "Employees receive 25 days.",
                "created_at": "2024-03-01T09:15:42",
                "rating": null
            }],
            "total": 21,
            "page": page,
            "page_size": page_size
        })),
    )
}

async fn search(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    b.record("search", &headers);
    if !b.authorized(&headers) {
        return unauthorized();
    }
    *b.last_search.lock().unwrap() = Some(body.clone());
    (
        StatusCode::OK,
        Json(json!({
            "query_id": "q2",
            "query": body["query"],
            "answer": "Employees receive 25 days.",
            "sources": [{
                "document_id": "d1",
                "document_title": "Handbook",
                "document_source": "hr/handbook.pdf",
                "chunk_content": "25 days of paid leave",
                "page_number": 12,
                "relevance_score": 0.91
            }],
            "performance": {
                "embedding_time_ms": 12.0,
                "search_time_ms": 8.5,
                "llm_time_ms": 640.0,
                "total_time_ms": 661.0
            },
            "metadata": {
                "is_fallback": false,
                "fallback_reason": null,
                "model_used": "llama3",
                "search_result_count": 1
            }
        })),
    )
}

async fn feedback(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Reply {
    b.record("feedback", &headers);
    if !b.authorized(&headers) {
        return unauthorized();
    }
    (
        StatusCode::CREATED,
        Json(json!({ "feedback_id": "f1", "message": "Thanks for your feedback" })),
    )
}

async fn health(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Reply {
    b.record("health", &headers);
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": "2024-03-01T09:15:42Z",
            "version": "1.4.0"
        })),
    )
}

async fn slow() -> Reply {
    tokio::time::sleep(Duration::from_secs(5)).await;
    (StatusCode::OK, Json(json!({})))
}

async fn forbidden() -> Reply {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "forbidden",
            "message": "Access level too low",
            "request_id": "r1"
        })),
    )
}

async fn boom() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn spawn_backend() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/users/me/history", get(history))
        .route("/api/v1/search", post(search))
        .route("/api/v1/feedback", post(feedback))
        .route("/health", get(health))
        .route("/slow", get(slow))
        .route("/forbidden", get(forbidden))
        .route("/boom", get(boom))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), backend)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(base_url: &str, tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.timeout_secs = 5;
    config.session.path = tmp.path().join("session.json");
    config
}

fn memory_client(base_url: &str) -> RagClient {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.timeout_secs = 5;
    RagClient::with_storage(&config, Arc::new(MemoryStorage::new())).unwrap()
}

async fn logged_in_client(base_url: &str) -> RagClient {
    let client = memory_client(base_url);
    client.init().unwrap();
    client
        .login("user@example.com", "password123")
        .await
        .unwrap();
    client
}

async fn wait_for_state(client: &RagClient, expected: AuthState) {
    let mut rx = client.auth().subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
        .await
        .expect("auth state did not change in time")
        .unwrap();
}

// ─── Authentication ─────────────────────────────────────────────────

#[tokio::test]
async fn test_login_persists_session_across_clients() {
    let (url, _backend) = spawn_backend().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&url, &tmp);

    let client = RagClient::from_config(&config).unwrap();
    let (state, _listener) = client.init().unwrap();
    assert_eq!(state, AuthState::Anonymous);

    let user = client
        .login("user@example.com", "password123")
        .await
        .unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.access_label(), "Level 2");
    assert!(client.auth().is_authenticated());
    assert_eq!(client.session().token().as_deref(), Some("tok1"));

    // A fresh client over the same file picks the session up.
    let restarted = RagClient::from_config(&config).unwrap();
    let (state, _listener) = restarted.init().unwrap();
    assert_eq!(state.user().map(|u| u.email.as_str()), Some("user@example.com"));

    let on_disk = FileStorage::new(config.session.path.clone());
    assert_eq!(on_disk.get("access_token").unwrap().as_deref(), Some("tok1"));
}

#[tokio::test]
async fn test_bad_credentials_stay_anonymous() {
    let (url, _backend) = spawn_backend().await;
    let client = memory_client(&url);
    client.init().unwrap();

    let err = client
        .login("user@example.com", "wrong")
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert!(!client.auth().is_authenticated());
    assert!(client.session().token().is_none());
}

#[tokio::test]
async fn test_bearer_token_attached_after_login() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;

    client.history(1, 10).await.unwrap();

    let headers = backend.auth_headers.lock().unwrap().clone();
    // Login goes out without a token; history carries it.
    assert_eq!(headers.first().cloned().flatten(), None);
    assert_eq!(headers.last().cloned().flatten().as_deref(), Some("Bearer tok1"));
}

#[tokio::test]
async fn test_rejected_token_signs_out_once() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;
    let mut events = client.session().subscribe();

    backend.revoked.store(true, Ordering::SeqCst);
    let err = client.history(1, 10).await.unwrap_err();
    assert!(err.error.is_unauthorized());
    assert!(err.stale.is_none());

    assert!(client.session().token().is_none());
    assert!(client.session().load().unwrap().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated);
    assert!(events.try_recv().is_err());
    // 401 is never retried.
    assert_eq!(backend.hits("history"), 1);

    wait_for_state(&client, AuthState::Anonymous).await;
    assert!(client.cache().is_empty());
}

/// Assert the client was signed out by exactly one invalidation.
async fn assert_signed_out_once(
    client: &RagClient,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) {
    assert!(client.session().token().is_none());
    assert!(client.session().load().unwrap().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated);
    assert!(events.try_recv().is_err());
    wait_for_state(client, AuthState::Anonymous).await;
}

#[tokio::test]
async fn test_rejected_search_signs_out_once() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;
    let mut events = client.session().subscribe();

    backend.revoked.store(true, Ordering::SeqCst);
    let err = client
        .search(SearchRequest::new("What is the vacation policy?"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    assert_signed_out_once(&client, &mut events).await;
    assert_eq!(backend.hits("search"), 1);
    assert!(matches!(
        client.search_mutation().state(),
        MutationState::Error(_)
    ));
}

#[tokio::test]
async fn test_rejected_feedback_signs_out_once() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;
    client.history(1, 10).await.unwrap();
    let mut events = client.session().subscribe();

    backend.revoked.store(true, Ordering::SeqCst);
    let err = client
        .submit_feedback(FeedbackDraft::new("q1").rating(4))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    assert_signed_out_once(&client, &mut events).await;
    assert_eq!(backend.hits("feedback"), 1);
    assert!(client.cache().is_empty());
    assert!(matches!(
        client.feedback_mutation().state(),
        MutationState::Error(_)
    ));
}

#[tokio::test]
async fn test_shared_rejected_fetch_signs_out_once() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;
    let mut events = client.session().subscribe();

    backend.revoked.store(true, Ordering::SeqCst);
    let (a, b) = tokio::join!(client.history(1, 10), client.history(1, 10));
    assert!(a.unwrap_err().error.is_unauthorized());
    assert!(b.unwrap_err().error.is_unauthorized());

    assert_signed_out_once(&client, &mut events).await;
    assert_eq!(backend.hits("history"), 1);
}

#[tokio::test]
async fn test_logout_is_clean_when_backend_unreachable() {
    // Nothing listens on the discard port.
    let client = memory_client("http://127.0.0.1:9");
    client
        .session()
        .save(&Session {
            token: "tok1".into(),
            user: serde_json::from_value(test_user()).unwrap(),
        })
        .unwrap();
    let (state, _listener) = client.init().unwrap();
    assert!(state.user().is_some());

    client.logout().await;

    assert_eq!(client.auth().state(), AuthState::Anonymous);
    assert!(client.session().token().is_none());
}

#[tokio::test]
async fn test_logout_calls_backend_and_clears() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;
    client.history(1, 10).await.unwrap();

    client.logout().await;

    assert_eq!(backend.hits("logout"), 1);
    assert_eq!(client.auth().state(), AuthState::Anonymous);
    assert!(client.session().token().is_none());
    assert!(client.cache().is_empty());
}

// ─── Queries and mutations ──────────────────────────────────────────

#[tokio::test]
async fn test_invalid_query_never_reaches_backend() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;

    let err = client.search(SearchRequest::new("hi")).await.unwrap_err();
    assert!(err.is_validation());

    let long = "x".repeat(201);
    let err = client.search(SearchRequest::new(long)).await.unwrap_err();
    assert!(err.is_validation());

    assert_eq!(backend.hits("search"), 0);
}

#[tokio::test]
async fn test_search_fills_user_and_session_ids() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;

    let response = client
        .search(SearchRequest::new("What is the vacation policy?").with_limit(3))
        .await
        .unwrap();
    assert_eq!(response.query_id, "q2");
    assert_eq!(response.sources[0].page_number, Some(12));

    let body = backend.last_search.lock().unwrap().clone().unwrap();
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["limit"], 3);
    assert!(body["session_id"].as_str().is_some_and(|s| !s.is_empty()));

    // Searches are never cached.
    client
        .search(SearchRequest::new("What is the vacation policy?"))
        .await
        .unwrap();
    assert_eq!(backend.hits("search"), 2);
}

#[tokio::test]
async fn test_concurrent_history_reads_share_one_request() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;

    let (a, b) = tokio::join!(client.history(1, 10), client.history(1, 10));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(backend.hits("history"), 1);

    // Still fresh: served from cache.
    let page = client.history(1, 10).await.unwrap();
    assert_eq!(backend.hits("history"), 1);
    assert_eq!(page.total_pages(), 3);
    assert!(page.has_next());
    assert!(!page.has_prev());

    // A different page is a different key.
    client.history(2, 10).await.unwrap();
    assert_eq!(backend.hits("history"), 2);
}

#[tokio::test]
async fn test_feedback_refreshes_history() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;

    client.history(1, 10).await.unwrap();
    assert_eq!(backend.hits("history"), 1);

    let response = client
        .submit_feedback(FeedbackDraft::new("q1").rating(5).comment("  spot on "))
        .await
        .unwrap();
    assert_eq!(response.feedback_id, "f1");

    client.history(1, 10).await.unwrap();
    assert_eq!(backend.hits("history"), 2);
}

#[tokio::test]
async fn test_invalid_feedback_never_reaches_backend() {
    let (url, backend) = spawn_backend().await;
    let client = logged_in_client(&url).await;

    let err = client
        .submit_feedback(FeedbackDraft::new("q1"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = client
        .submit_feedback(FeedbackDraft::new("q1").rating(6))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(backend.hits("feedback"), 0);
}

#[tokio::test]
async fn test_health_query_is_cached() {
    let (url, backend) = spawn_backend().await;
    let client = memory_client(&url);

    let health = client.health().await.unwrap();
    assert!(health.is_healthy());
    assert_eq!(health.version, "1.4.0");

    client.health().await.unwrap();
    assert_eq!(backend.hits("health"), 1);
}

#[tokio::test]
async fn test_health_monitor_polls() {
    let (url, backend) = spawn_backend().await;
    let client = memory_client(&url);

    let monitor = client.watch_health();
    tokio::time::timeout(Duration::from_secs(2), async {
        while backend.hits("health") == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(monitor.is_running());

    monitor.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!monitor.is_running());
}

// ─── Error classification ───────────────────────────────────────────

#[tokio::test]
async fn test_timeout_is_classified() {
    let (url, _backend) = spawn_backend().await;
    let gateway = Gateway::builder(url)
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = gateway
        .request(Method::GET, "/slow", None, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, HttpErrorKind::Timeout);
    assert_eq!(err.status, None);
}

#[tokio::test]
async fn test_error_bodies_are_classified() {
    let (url, _backend) = spawn_backend().await;
    let gateway = Gateway::builder(url).build().unwrap();

    let err = gateway
        .request(Method::GET, "/forbidden", None, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, HttpErrorKind::Forbidden);
    assert_eq!(err.status, Some(403));
    assert_eq!(err.message, "Access level too low");

    let err = gateway
        .request(Method::GET, "/boom", None, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, HttpErrorKind::ServerError);
    assert_eq!(err.message, "upstream exploded");
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let gateway = Gateway::builder("http://127.0.0.1:9").build().unwrap();
    let err = gateway
        .request(Method::GET, "/health", None, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, HttpErrorKind::NetworkError);
}
