/// Live subscriptions against an in-process WebSocket server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use tokio::sync::Notify;

use parley_api::ApiClient;
use parley_gateway::{Gateway, GatewayConfig, LiveStream};
use parley_session::{SessionContext, StoredSession};
use parley_types::events::LiveEvent;
use parley_types::models::TargetKey;

#[derive(Default)]
struct Room {
    connections: AtomicUsize,
    closed: AtomicUsize,
    closed_notify: Notify,
    close_after_first: bool,
    paths: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
}

fn frame(id: i64, group: i64) -> String {
    json!({
        "type": "chat_message",
        "message": {
            "id": id,
            "sender_id": 2,
            "sender_username": "bob",
            "group_id": group,
            "content": format!("message {}", id),
            "timestamp": "2025-03-01T10:00:00Z",
        }
    })
    .to_string()
}

async fn group_ws(
    State(room): State<Arc<Room>>,
    Path(group): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    room.paths.lock().unwrap().push(format!("group/{}/", group));
    room.tokens
        .lock()
        .unwrap()
        .push(query.get("token").cloned().unwrap_or_default());
    ws.on_upgrade(move |socket| serve(socket, room, group))
}

async fn direct_ws(
    State(room): State<Arc<Room>>,
    Path(name): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    room.paths.lock().unwrap().push(format!("chat/{}/", name));
    ws.on_upgrade(move |socket| serve(socket, room, 0))
}

async fn serve(mut socket: WebSocket, room: Arc<Room>, group: i64) {
    let n = room.connections.fetch_add(1, Ordering::SeqCst) as i64;

    let _ = socket.send(Message::Text("not json".into())).await;
    let _ = socket
        .send(Message::Text(json!({"message": "legacy echo"}).to_string().into()))
        .await;
    let _ = socket.send(Message::Text(frame(100 + n, group).into())).await;

    if room.close_after_first && n == 0 {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
    room.closed.fetch_add(1, Ordering::SeqCst);
    room.closed_notify.notify_one();
}

async fn spawn(room: Arc<Room>) -> String {
    let app = Router::new()
        .route("/ws/group/{id}/", get(group_ws))
        .route("/ws/chat/{name}/", get(direct_ws))
        .with_state(room);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{}/ws/", addr)
}

fn access_token() -> String {
    let claims = json!({
        "exp": chrono::Utc::now().timestamp() + 600,
        "user_id": 7,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"srv")).unwrap()
}

fn gateway(ws_base: &str, access: &str) -> Gateway {
    let session = SessionContext::in_memory(StoredSession {
        access_token: Some(access.to_string()),
        refresh_token: Some("r1".into()),
        username: Some("ann".into()),
        user_id: Some(7),
    });
    let api = ApiClient::new("http://127.0.0.1:9/api/", session).unwrap();
    let mut config = GatewayConfig::new(ws_base).unwrap();
    config.initial_backoff = Duration::from_millis(20);
    config.max_backoff = Duration::from_millis(80);
    Gateway::new(config, api)
}

async fn next(sub: &mut parley_gateway::Subscription) -> LiveEvent {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for live event")
        .expect("subscription ended")
}

#[tokio::test]
async fn delivers_messages_and_skips_other_frames() {
    let room = Arc::new(Room::default());
    let base = spawn(room.clone()).await;
    let token = access_token();
    let gateway = gateway(&base, &token);

    let mut sub = gateway.subscribe(TargetKey::Group(5));
    assert_eq!(sub.target(), TargetKey::Group(5));

    assert_eq!(next(&mut sub).await, LiveEvent::Connected { target: TargetKey::Group(5) });
    match next(&mut sub).await {
        LiveEvent::MessageCreate(m) => {
            assert_eq!(m.id, 100);
            assert_eq!(m.group_id, Some(5));
            assert_eq!(m.content.as_deref(), Some("message 100"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(*room.tokens.lock().unwrap(), vec![token]);
    assert_eq!(*room.paths.lock().unwrap(), vec!["group/5/".to_string()]);
}

#[tokio::test]
async fn direct_conversations_use_a_shared_room() {
    let room = Arc::new(Room::default());
    let base = spawn(room.clone()).await;
    let gateway = gateway(&base, &access_token());

    let mut sub = gateway.subscribe(TargetKey::User(3));
    assert_eq!(next(&mut sub).await, LiveEvent::Connected { target: TargetKey::User(3) });
    assert_eq!(*room.paths.lock().unwrap(), vec!["chat/3_7/".to_string()]);
}

#[tokio::test]
async fn cancelling_closes_the_socket() {
    let room = Arc::new(Room::default());
    let base = spawn(room.clone()).await;
    let gateway = gateway(&base, &access_token());

    let mut sub = gateway.subscribe(TargetKey::Group(1));
    next(&mut sub).await;
    next(&mut sub).await;

    let closed = room.closed_notify.notified();
    sub.cancel();
    assert!(sub.recv().await.is_none());
    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("server never saw the close");
    assert_eq!(room.closed.load(Ordering::SeqCst), 1);
    assert_eq!(room.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_the_subscription_closes_the_socket() {
    let room = Arc::new(Room::default());
    let base = spawn(room.clone()).await;
    let gateway = gateway(&base, &access_token());

    let mut sub = gateway.subscribe(TargetKey::Group(1));
    next(&mut sub).await;

    let closed = room.closed_notify.notified();
    drop(sub);
    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("server never saw the close");
}

#[tokio::test]
async fn reconnects_after_the_server_drops() {
    let room = Arc::new(Room {
        close_after_first: true,
        ..Room::default()
    });
    let base = spawn(room.clone()).await;
    let gateway = gateway(&base, &access_token());

    let mut sub = gateway.subscribe(TargetKey::Group(2));
    let target = TargetKey::Group(2);

    assert_eq!(next(&mut sub).await, LiveEvent::Connected { target });
    assert_eq!(next(&mut sub).await.message().map(|m| m.id), Some(100));
    assert_eq!(next(&mut sub).await, LiveEvent::Disconnected { target });
    assert_eq!(next(&mut sub).await, LiveEvent::Connected { target });
    assert_eq!(next(&mut sub).await.message().map(|m| m.id), Some(101));
    assert_eq!(room.connections.load(Ordering::SeqCst), 2);
}
