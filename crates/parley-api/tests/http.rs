/// End-to-end behaviour of the API client against an in-process fake server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};

use parley_api::{ApiClient, ApiError, Draft};
use parley_session::{SessionContext, SessionEvent, SessionStore, SqliteStore, StoredSession};
use parley_types::models::TargetKey;

static SERIAL: AtomicUsize = AtomicUsize::new(0);

fn jwt(exp_offset_secs: i64) -> String {
    let claims = json!({
        "exp": chrono::Utc::now().timestamp() + exp_offset_secs,
        "user_id": 1,
        "jti": SERIAL.fetch_add(1, Ordering::SeqCst),
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"srv")).unwrap()
}

struct Backend {
    valid_access: Mutex<String>,
    refresh_ok: bool,
    reject_all: bool,
    refresh_calls: AtomicUsize,
    seen_tokens: Mutex<Vec<String>>,
}

impl Backend {
    fn new(valid_access: String, refresh_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            valid_access: Mutex::new(valid_access),
            refresh_ok,
            reject_all: false,
            refresh_calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
        })
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string();
        self.seen_tokens.lock().unwrap().push(token.clone());

        if self.reject_all || token != *self.valid_access.lock().unwrap() {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "Given token not valid for any token type"})),
            )
                .into_response());
        }
        Ok(())
    }

    fn seen(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }
}

async fn refresh(State(b): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    b.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;

    if !b.refresh_ok || body["refresh"].as_str().is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired"})),
        )
            .into_response();
    }
    let fresh = jwt(1800);
    *b.valid_access.lock().unwrap() = fresh.clone();
    Json(json!({"access": fresh, "refresh": "rotated-refresh"})).into_response()
}

async fn users(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if let Err(resp) = b.authorize(&headers) {
        return resp;
    }
    Json(json!([
        {"id": 2, "username": "bob", "email": "bob@example.com", "profile_picture": null,
         "last_message_time": null, "last_message": {"text": null, "timestamp": null}}
    ]))
    .into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["email"] != "ann@example.com" || body["password"] != "pw" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid email or password."})),
        )
            .into_response();
    }
    Json(json!({"access": jwt(1800), "refresh": "r-login", "username": "ann"})).into_response()
}

async fn send_message(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = b.authorize(&headers) {
        return resp;
    }
    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(String::from);
        let data = field.bytes().await.unwrap();
        let value = file_name.unwrap_or_else(|| String::from_utf8_lossy(&data).into_owned());
        fields.insert(name, value);
    }
    let recipient: i64 = fields["recipient_id"].parse().unwrap();
    (
        StatusCode::CREATED,
        Json(json!({
            "id": 41,
            "sender": 1,
            "receiver": recipient,
            "content": fields.get("content"),
            "file_url": fields.get("file").map(|f| format!("http://h/media/uploads/{}", f)),
            "timestamp": "2025-03-01T10:00:00Z",
        })),
    )
        .into_response()
}

async fn create_group(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if let Err(resp) = b.authorize(&headers) {
        return resp;
    }
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "Group already exists"})),
    )
        .into_response()
}

async fn spawn(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/api/token/refresh/", post(refresh))
        .route("/api/users/", get(users))
        .route("/api/login/", post(login))
        .route("/api/send_message/", post(send_message))
        .route("/api/groups/create/", post(create_group))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api", addr)
}

fn logged_in(access: String) -> SessionContext {
    SessionContext::in_memory(StoredSession {
        access_token: Some(access),
        refresh_token: Some("r1".into()),
        username: Some("ann".into()),
        user_id: Some(1),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_simultaneous_requests_refresh_once() {
    let backend = Backend::new("not-yet-issued".into(), true);
    let base = spawn(backend.clone()).await;
    let client = ApiClient::new(&base, logged_in(jwt(-120))).unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let c = client.clone();
        tasks.spawn(async move { c.users().await });
    }
    while let Some(result) = tasks.join_next().await {
        let users = result.unwrap().unwrap();
        assert_eq!(users[0].username, "bob");
    }

    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    let fresh = backend.valid_access.lock().unwrap().clone();
    let seen = backend.seen();
    assert_eq!(seen.len(), 5);
    assert!(seen.iter().all(|t| *t == fresh));
    assert_eq!(
        client.session().refresh_token().as_deref(),
        Some("rotated-refresh")
    );
}

#[tokio::test]
async fn unauthorized_response_refreshes_and_retries_once() {
    let backend = Backend::new("server-rotated".into(), true);
    let base = spawn(backend.clone()).await;
    let stale = jwt(600);
    let client = ApiClient::new(&base, logged_in(stale.clone())).unwrap();

    client.users().await.unwrap();

    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    let seen = backend.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], stale);
    assert_eq!(seen[1], *backend.valid_access.lock().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_requests_never_resend_stale_token() {
    let backend = Backend::new("server-rotated".into(), true);
    let base = spawn(backend.clone()).await;
    let stale = jwt(600);
    let client = ApiClient::new(&base, logged_in(stale.clone())).unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..3 {
        let c = client.clone();
        tasks.spawn(async move { c.users().await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    let fresh = backend.valid_access.lock().unwrap().clone();
    let seen = backend.seen();
    assert_eq!(seen.iter().filter(|t| **t == fresh).count(), 3);
    assert!(seen.iter().filter(|t| **t == stale).count() <= 3);
}

#[tokio::test]
async fn rejected_refresh_token_clears_storage() {
    let backend = Backend::new("unused".into(), false);
    let base = spawn(backend.clone()).await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
        .save(&StoredSession {
            access_token: Some(jwt(-60)),
            refresh_token: Some("expired-refresh".into()),
            username: Some("ann".into()),
            user_id: Some(1),
        })
        .unwrap();
    let session = SessionContext::load(store.clone()).unwrap();
    let mut events = session.subscribe();
    let client = ApiClient::new(&base, session).unwrap();

    let err = client.users().await.unwrap_err();
    assert!(err.needs_login(), "unexpected error: {err}");
    assert!(store.is_empty().unwrap());
    assert!(!client.session().is_logged_in());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoginRequired);
    assert!(backend.seen().is_empty());

    // nothing left to refresh with: fails fast without touching the server
    let err = client.users().await.unwrap_err();
    assert!(matches!(err, ApiError::LoginRequired));
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_unauthorized_ends_session() {
    let backend = Arc::new(Backend {
        valid_access: Mutex::new(String::new()),
        refresh_ok: true,
        reject_all: true,
        refresh_calls: AtomicUsize::new(0),
        seen_tokens: Mutex::new(Vec::new()),
    });
    let base = spawn(backend.clone()).await;
    let client = ApiClient::new(&base, logged_in(jwt(600))).unwrap();

    let err = client.users().await.unwrap_err();
    assert!(matches!(err, ApiError::LoginRequired));
    assert_eq!(backend.seen().len(), 2);
    assert!(!client.session().is_logged_in());
}

#[tokio::test]
async fn login_persists_tokens_and_identity() {
    let backend = Backend::new("unused".into(), true);
    let base = spawn(backend).await;
    let client = ApiClient::new(&base, SessionContext::in_memory(StoredSession::default())).unwrap();

    let err = client.login("ann@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert!(err.to_string().contains("Invalid email or password."));

    client.login("  Ann@Example.com ", "pw").await.unwrap();
    let session = client.session();
    assert_eq!(session.refresh_token().as_deref(), Some("r-login"));
    assert_eq!(session.username().as_deref(), Some("ann"));
    assert_eq!(session.user_id(), Some(1));
}

#[tokio::test]
async fn send_message_uploads_multipart_form() {
    let access = jwt(600);
    let backend = Backend::new(access.clone(), true);
    let base = spawn(backend).await;
    let client = ApiClient::new(&base, logged_in(access)).unwrap();

    let draft = Draft {
        text: Some("  hello  ".into()),
        file: Some(parley_api::Attachment::new("cat.png", vec![1, 2, 3])),
    };
    let message = client.send_message(TargetKey::User(2), &draft).await.unwrap();
    assert_eq!(message.receiver_id, Some(2));
    // whitespace is only used to decide emptiness; the text goes out as typed
    assert_eq!(message.content.as_deref(), Some("  hello  "));
    assert!(message.has_image());

    let err = client
        .send_message(TargetKey::User(2), &Draft::text("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Invalid(_)));
}

#[tokio::test]
async fn server_errors_surface_their_message() {
    let access = jwt(600);
    let backend = Backend::new(access.clone(), true);
    let base = spawn(backend.clone()).await;
    let client = ApiClient::new(&base, logged_in(access)).unwrap();

    let err = client.create_group("ops", &[2, 3]).await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::BAD_REQUEST));
    assert!(err.to_string().contains("Group already exists"));

    let before = backend.seen().len();
    assert!(matches!(client.create_group("  ", &[2]).await, Err(ApiError::Invalid(_))));
    assert!(matches!(client.create_group("ops", &[]).await, Err(ApiError::Invalid(_))));
    assert_eq!(backend.seen().len(), before);
}
