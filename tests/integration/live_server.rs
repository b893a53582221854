//! End-to-end tests against an in-process chat server.
//!
//! The server is a small axum app speaking the real wire protocol: the three
//! REST endpoints and a broadcasting `/websocket` endpoint. Clients use the
//! production [`HttpChatApi`] and [`WsConnector`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use url::Url;

use unichat::api::http::HttpChatApi;
use unichat::api::{ApiError, ChatApi};
use unichat::auth::AuthState;
use unichat::chat::log::DeliveryStatus;
use unichat::chat::{ChatConfig, ChatController, ChatHandle, ChatView};
use unichat::session::{Identity, MemoryStore, SessionStore};
use unichat::transport::ws::WsConnector;
use unichat::transport::{ConnectionState, Connector, FrameLink};
use unichat_proto::auth::{AuthRequest, ExistsRequest};
use unichat_proto::frame::OutboundFrame;

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ServerState {
    users: Arc<Mutex<HashSet<String>>>,
    history: Arc<Mutex<Vec<Value>>>,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<String>,
}

struct TestServer {
    addr: std::net::SocketAddr,
    state: ServerState,
}

impl TestServer {
    fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/websocket", self.addr)
    }
}

async fn spawn_server(history: Vec<Value>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events, _) = broadcast::channel(64);
    let state = ServerState {
        users: Arc::new(Mutex::new(HashSet::new())),
        history: Arc::new(Mutex::new(history)),
        next_id: Arc::new(AtomicU64::new(100)),
        events,
    };
    let app = Router::new()
        .route("/api/auth", post(handle_auth))
        .route("/api/exists", post(handle_exists))
        .route("/api/messages", get(handle_messages))
        .route("/websocket", get(handle_ws))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestServer { addr, state }
}

async fn handle_auth(
    State(state): State<ServerState>,
    Json(req): Json<AuthRequest>,
) -> impl IntoResponse {
    if req.password != "secret" {
        return (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string());
    }
    let user_id = format!("id-{}", req.username);
    state.users.lock().insert(user_id.clone());
    (StatusCode::OK, format!("\"{user_id};{}\"", req.username))
}

async fn handle_exists(
    State(state): State<ServerState>,
    Json(req): Json<ExistsRequest>,
) -> Json<bool> {
    Json(state.users.lock().contains(&req.id))
}

async fn handle_messages(State(state): State<ServerState>) -> Json<Vec<Value>> {
    Json(state.history.lock().clone())
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    // Subscribe before the handshake completes so no broadcast is missed.
    let events_rx = state.events.subscribe();
    ws.on_upgrade(move |socket| ws_connection(state, events_rx, socket))
}

async fn ws_connection(
    state: ServerState,
    mut events_rx: broadcast::Receiver<String>,
    socket: WebSocket,
) {
    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Ok(text) = events_rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<OutboundFrame>(text.as_str()) else {
            continue;
        };
        let id = state.next_id.fetch_add(1, Ordering::SeqCst);
        let record = json!({
            "id": id,
            "sender": frame.message_dto.sender,
            "username": frame.message_dto.username,
            "content": frame.message_dto.content,
            "timestamp": "2024-05-01T10:00:00",
        });
        state.history.lock().push(record.clone());
        let _ = state
            .events
            .send(json!({ "action": "receive", "messageDTO": record }).to_string());
    }

    send_task.abort();
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn api(server: &TestServer) -> HttpChatApi {
    HttpChatApi::new(server.base_url(), Duration::from_secs(5)).unwrap()
}

fn spawn_client(
    server: &TestServer,
    store: Arc<MemoryStore>,
) -> (ChatHandle, watch::Receiver<ChatView>) {
    let (controller, handle, view) = ChatController::new(
        Arc::new(api(server)),
        SessionStore::new(store),
        Arc::new(WsConnector),
        ChatConfig::new(server.ws_url()),
    );
    tokio::spawn(controller.run());
    (handle, view)
}

async fn wait_for(
    view: &mut watch::Receiver<ChatView>,
    what: &str,
    done: impl FnMut(&ChatView) -> bool,
) -> ChatView {
    tokio::time::timeout(Duration::from_secs(10), view.wait_for(done))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("controller stopped")
        .clone()
}

fn is_live(view: &ChatView) -> bool {
    view.auth.is_authenticated()
        && view.connection == ConnectionState::Open
        && !view.loading_history
}

// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_api_speaks_the_rest_contract() {
    let server = spawn_server(vec![json!({
        "id": 1,
        "sender": "id-bob",
        "username": "bob",
        "content": "welcome",
        "timestamp": 1_714_557_600_000_i64,
    })])
    .await;
    let api = api(&server);

    let body = api.authenticate("alice", "secret").await.unwrap();
    assert_eq!(body, "\"id-alice;alice\"");
    assert_eq!(
        api.authenticate("alice", "nope").await,
        Err(ApiError::Status {
            status: 401,
            body: "Invalid credentials".to_string()
        })
    );

    assert!(api.user_exists("id-alice").await.unwrap());
    assert!(!api.user_exists("id-mallory").await.unwrap());

    let history = api.fetch_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id.as_deref(), Some("1"));
    assert_eq!(history[0].username.as_deref(), Some("bob"));
    assert_eq!(
        history[0].timestamp.map(|t| t.as_millis()),
        Some(1_714_557_600_000)
    );
}

#[tokio::test]
async fn mistyped_history_records_are_skipped_individually() {
    let server = spawn_server(vec![
        json!({ "id": 1, "sender": "id-bob", "username": "bob", "content": "first" }),
        json!({ "id": 2, "sender": "id-bob", "content": { "rich": "text" } }),
        json!("not a record"),
        json!({ "id": 3, "sender": "id-bob", "username": 42, "content": "third" }),
    ])
    .await;
    let store = Arc::new(MemoryStore::new());
    let (handle, mut view) = spawn_client(&server, store);
    wait_for(&mut view, "startup", |v| v.auth == AuthState::Unauthenticated).await;

    handle.login("alice", "secret").await.unwrap();
    let snapshot = wait_for(&mut view, "live session", is_live).await;

    let ids: Vec<_> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["1", "3"]);
    assert_eq!(snapshot.messages[1].author_name, "42");
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn http_api_reports_missing_endpoints_as_status() {
    let server = spawn_server(Vec::new()).await;
    let api = HttpChatApi::new(
        server.base_url().join("nested/").unwrap(),
        Duration::from_secs(5),
    )
    .unwrap();

    let result = api.fetch_history().await;
    assert!(
        matches!(result, Err(ApiError::Status { status: 404, .. })),
        "{result:?}"
    );
}

// ---------------------------------------------------------------------------
// WebSocket connector
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ws_connector_sends_and_receives_frames() {
    let server = spawn_server(Vec::new()).await;
    let mut link = WsConnector.connect(&server.ws_url()).await.unwrap();

    let frame = OutboundFrame::send("ping", "id-alice", Some("alice".to_string()))
        .encode()
        .unwrap();
    link.send_text(frame).await.unwrap();

    let echoed: Value = serde_json::from_str(&link.next_text().await.unwrap().unwrap()).unwrap();
    assert_eq!(echoed["action"], "receive");
    assert_eq!(echoed["messageDTO"]["content"], "ping");
    assert_eq!(echoed["messageDTO"]["id"], 100);
    assert_eq!(server.state.history.lock().len(), 1);

    link.close().await;
}

// ---------------------------------------------------------------------------
// Controller end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_clients_chat_and_session_survives_restart() {
    let server = spawn_server(Vec::new()).await;

    let alice_store = Arc::new(MemoryStore::new());
    let (alice, mut alice_view) = spawn_client(&server, Arc::clone(&alice_store));
    let (bob, mut bob_view) = spawn_client(&server, Arc::new(MemoryStore::new()));

    for (handle, view, name) in [
        (&alice, &mut alice_view, "alice"),
        (&bob, &mut bob_view, "bob"),
    ] {
        wait_for(view, "startup", |v| v.auth == AuthState::Unauthenticated).await;
        handle.login(name, "secret").await.unwrap();
        wait_for(view, "live session", is_live).await;
    }

    alice.send("hello bob").await.unwrap();

    let view = wait_for(&mut alice_view, "confirmed send", |v| {
        v.messages
            .first()
            .is_some_and(|m| m.status == DeliveryStatus::Delivered)
    })
    .await;
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id, "100");
    assert_eq!(view.messages[0].text, "hello bob");

    let view = wait_for(&mut bob_view, "message from alice", |v| !v.messages.is_empty()).await;
    assert_eq!(view.messages[0].author_name, "alice");
    assert_eq!(view.messages[0].sender_id, "id-alice");
    assert!(!view.messages[0].is_optimistic);

    alice.shutdown().await.unwrap();

    let (_restarted, mut restarted_view) = spawn_client(&server, alice_store);
    let view = wait_for(&mut restarted_view, "restored session", is_live).await;
    assert_eq!(
        view.auth,
        AuthState::Authenticated(Identity::new("id-alice", "alice"))
    );
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id, "100");
}

#[tokio::test]
async fn wrong_password_keeps_client_logged_out() {
    let server = spawn_server(Vec::new()).await;
    let (handle, mut view) = spawn_client(&server, Arc::new(MemoryStore::new()));
    wait_for(&mut view, "startup", |v| v.auth == AuthState::Unauthenticated).await;

    handle.login("alice", "wrong").await.unwrap();
    let snapshot = wait_for(&mut view, "login error", |v| v.error.is_some()).await;

    assert_eq!(snapshot.auth, AuthState::Unauthenticated);
    assert_eq!(snapshot.connection, ConnectionState::Idle);
    assert!(snapshot.error.unwrap().contains("401"));
}
