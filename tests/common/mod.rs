//! Common test utilities for integration tests
//! In-memory sockets for the connection manager, an in-memory message API
//! for the chat synchronizer and an actix-web mock of the REST services.
#![allow(dead_code)]

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use messenger_client::api::MessageApi;
use messenger_client::error::{ClientError, Result};
use messenger_client::models::{
    ChatId, Conversation, CreateChatRequest, EditMessageRequest, Message, MessageId,
    MessageStatus, RenameChatRequest, SendMessageRequest, UserProfile,
};
use messenger_client::services::{
    ConnectionManager, ConnectionState, Connector, CredentialSource, FrameSink, FrameStream,
};
use messenger_client::ReconnectPolicy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const WS_ENDPOINT: &str = "ws://realtime.test/ws";

// ---------------------------------------------------------------------------
// In-memory sockets
// ---------------------------------------------------------------------------

/// Server end of one accepted in-memory socket
pub struct ServerSocket {
    pub url: String,
    outbound: fmpsc::UnboundedReceiver<String>,
    inbound: fmpsc::UnboundedSender<Result<String>>,
}

impl ServerSocket {
    /// Next frame the client wrote, parsed as JSON
    pub async fn recv(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(60), self.outbound.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the socket");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Frame the client wrote, if one is already waiting
    pub fn try_recv(&mut self) -> Option<Value> {
        match self.outbound.try_next() {
            Ok(Some(text)) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    pub fn push(&self, topic: &str, payload: Value) {
        self.push_raw(&json!({"type": topic, "payload": payload}).to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.inbound.unbounded_send(Ok(text.to_string()));
    }

    /// Fail the socket with a transport error
    pub fn fail(&self) {
        let _ = self
            .inbound
            .unbounded_send(Err(ClientError::WebSocket("connection reset".to_string())));
    }

    /// Close from the server side
    pub fn close(self) {}
}

/// Scriptable connector: each attempt takes the next scripted outcome,
/// refusing once the script runs out.
pub struct MemoryConnector {
    script: Mutex<VecDeque<bool>>,
    attempts: AtomicUsize,
    accepted_tx: mpsc::UnboundedSender<ServerSocket>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerSocket>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Arc::new(MemoryConnector {
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        })
    }

    /// Accept the next `n` attempts
    pub fn accept(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        script.extend(std::iter::repeat(true).take(n));
    }

    /// Refuse the next `n` attempts
    pub fn refuse(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        script.extend(std::iter::repeat(false).take(n));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted socket
    pub async fn next_socket(&self) -> ServerSocket {
        let mut rx = self.accepted_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: url::Url) -> BoxFuture<'static, Result<(FrameSink, FrameStream)>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if !accept {
            return Box::pin(async { Err(ClientError::WebSocket("connection refused".to_string())) });
        }

        let (out_tx, out_rx) = fmpsc::unbounded::<String>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<String>>();
        let _ = self.accepted_tx.send(ServerSocket {
            url: url.to_string(),
            outbound: out_rx,
            inbound: in_tx,
        });

        let sink = out_tx.sink_map_err(|e| ClientError::WebSocket(e.to_string()));
        let sink: FrameSink = Box::pin(sink);
        let stream: FrameStream = Box::pin(in_rx);
        Box::pin(async move { Ok((sink, stream)) })
    }
}

/// Credential that tests can swap or remove
pub struct TestCredential(Mutex<Option<String>>);

impl TestCredential {
    pub fn new(token: Option<&str>) -> Arc<Self> {
        Arc::new(TestCredential(Mutex::new(token.map(str::to_string))))
    }

    pub fn set(&self, token: Option<&str>) {
        *self.0.lock().unwrap() = token.map(str::to_string);
    }
}

impl CredentialSource for TestCredential {
    fn credential(&self) -> Option<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn connection(connector: &Arc<MemoryConnector>, credential: &Arc<TestCredential>) -> ConnectionManager {
    ConnectionManager::new(
        WS_ENDPOINT,
        ReconnectPolicy::default(),
        connector.clone(),
        credential.clone(),
    )
}

/// Wait until the manager reports `state`
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut status = manager.watch_status();
    tokio::time::timeout(Duration::from_secs(120), status.wait_for(|s| s.state == state))
        .await
        .expect("timed out waiting for connection state")
        .expect("status channel closed");
}

/// Poll `condition` until it holds, yielding to other tasks in between
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// In-memory message API
// ---------------------------------------------------------------------------

pub fn message_at(id: &str, chat: &str, content: &str, created: DateTime<Utc>) -> Message {
    Message {
        id: MessageId::new(id),
        chat_id: ChatId::new(chat),
        sender_id: "u2".to_string(),
        content: content.to_string(),
        created_at: created,
        updated_at: created,
        status: MessageStatus::Sent,
        sender: None,
        client_id: None,
    }
}

struct ScriptedFetch {
    gate: Option<oneshot::Receiver<()>>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct FakeMessageApi {
    history: Mutex<HashMap<ChatId, Vec<Message>>>,
    fetches: Mutex<VecDeque<ScriptedFetch>>,
    send_gate: Mutex<Option<oneshot::Receiver<()>>>,
    pub calls: AtomicUsize,
    pub fail_fetches: AtomicBool,
    pub fail_sends: AtomicBool,
    /// Echo the correlation id back in send responses
    pub echo_client_id: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeMessageApi {
    pub fn new() -> Arc<Self> {
        let api = FakeMessageApi::default();
        api.echo_client_id.store(true, Ordering::SeqCst);
        Arc::new(api)
    }

    pub fn set_history(&self, chat: &str, messages: Vec<Message>) {
        self.history
            .lock()
            .unwrap()
            .insert(ChatId::new(chat), messages);
    }

    /// Next fetch returns `messages`, held until the returned sender fires
    pub fn hold_next_fetch(&self, messages: Vec<Message>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.fetches.lock().unwrap().push_back(ScriptedFetch {
            gate: Some(rx),
            messages,
        });
        tx
    }

    /// Next send is held until the returned sender fires
    pub fn hold_next_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.send_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Id the next successful send will be assigned
    pub fn next_message_id(&self) -> MessageId {
        MessageId::new(format!("m{}", 100 + self.next_id.load(Ordering::SeqCst)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MessageApi for FakeMessageApi {
    fn fetch_messages(&self, chat_id: &ChatId) -> impl Future<Output = Result<Vec<Message>>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fetches.lock().unwrap().pop_front();
        let fail = self.fail_fetches.load(Ordering::SeqCst);
        let history = self
            .history
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .unwrap_or_default();

        async move {
            if let Some(ScriptedFetch { gate, messages }) = scripted {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                return Ok(messages);
            }
            if fail {
                return Err(ClientError::Api {
                    status: 500,
                    message: "Failed to fetch messages".to_string(),
                });
            }
            Ok(history)
        }
    }

    fn send_message(
        &self,
        chat_id: &ChatId,
        content: &str,
        client_id: &str,
    ) -> impl Future<Output = Result<Message>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.send_gate.lock().unwrap().take();
        let fail = self.fail_sends.load(Ordering::SeqCst);

        let result = if fail {
            Err(ClientError::Api {
                status: 500,
                message: "Failed to send message".to_string(),
            })
        } else {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut message = message_at(&format!("m{}", 100 + n), chat_id.as_str(), content, Utc::now());
            message.sender_id = "u1".to_string();
            if self.echo_client_id.load(Ordering::SeqCst) {
                message.client_id = Some(client_id.to_string());
            }
            Ok(message)
        };

        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }
    }

    fn edit_message(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let existing = self
            .history
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|m| &m.id == message_id)
            .cloned();
        let content = content.to_string();
        let id = message_id.clone();

        async move {
            let mut message = existing.ok_or_else(|| ClientError::Api {
                status: 404,
                message: format!("Message {} not found", id),
            })?;
            message.content = content;
            message.updated_at = Utc::now();
            Ok(message)
        }
    }

    fn delete_message(&self, message_id: &MessageId) -> impl Future<Output = Result<()>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut history = self.history.lock().unwrap();
        let mut found = false;
        for messages in history.values_mut() {
            let before = messages.len();
            messages.retain(|m| &m.id != message_id);
            found |= messages.len() != before;
        }
        let id = message_id.clone();

        async move {
            if found {
                Ok(())
            } else {
                Err(ClientError::Api {
                    status: 404,
                    message: format!("Message {} not found", id),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mock REST backend
// ---------------------------------------------------------------------------

pub const TEST_USER_ID: &str = "u1";
pub const TEST_PASSWORD: &str = "secret";

/// Unsigned JWT carrying a `user_id` claim
pub fn test_token(user_id: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(json!({"user_id": user_id, "exp": 4102444800u64}).to_string())
    )
}

#[derive(Default)]
pub struct BackendState {
    pub chats: Mutex<Vec<Conversation>>,
    pub messages: Mutex<HashMap<String, Vec<Message>>>,
    /// Force every authenticated endpoint to answer 401
    pub reject_tokens: AtomicBool,
    pub requests: AtomicUsize,
    pub friend_requests: Mutex<Vec<(String, String)>>,
    next_id: AtomicUsize,
}

impl BackendState {
    pub fn add_chat(&self, id: &str, name: &str) {
        let now = Utc::now();
        self.chats.lock().unwrap().push(Conversation {
            id: ChatId::new(id),
            name: name.to_string(),
            is_group: true,
            participants: vec![TEST_USER_ID.to_string()],
            last_message: None,
            created_at: now,
            updated_at: now,
        });
    }

    pub fn add_message(&self, chat: &str, id: &str, content: &str) {
        let message = message_at(id, chat, content, Utc::now());
        self.messages
            .lock()
            .unwrap()
            .entry(chat.to_string())
            .or_default()
            .push(message);
    }

    pub fn message_count(&self, chat: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .get(chat)
            .map_or(0, Vec::len)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

type State = web::Data<BackendState>;

fn authorized(req: &HttpRequest, state: &BackendState) -> bool {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if state.reject_tokens.load(Ordering::SeqCst) {
        return false;
    }
    let expected = format!("Bearer {}", test_token(TEST_USER_ID));
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str())
}

macro_rules! require_auth {
    ($req:expr, $state:expr) => {
        if !authorized(&$req, &$state) {
            return HttpResponse::Unauthorized().finish();
        }
    };
}

#[derive(Deserialize)]
struct Credentials {
    nickname: String,
    password: String,
}

async fn login(body: web::Json<Credentials>) -> HttpResponse {
    if body.nickname != "alice" || body.password != TEST_PASSWORD {
        return HttpResponse::Unauthorized().body("invalid credentials");
    }
    HttpResponse::Ok().json(json!({
        "data": {"accessToken": test_token(TEST_USER_ID), "refreshToken": "refresh-1"},
        "success": true
    }))
}

async fn register(body: web::Json<Value>) -> HttpResponse {
    if body.get("nickname").and_then(Value::as_str) == Some("taken") {
        return HttpResponse::Conflict().body("nickname already taken");
    }
    HttpResponse::Ok().json(json!({
        "data": {"accessToken": test_token(TEST_USER_ID), "refreshToken": "refresh-1"},
        "success": true
    }))
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

#[derive(Deserialize)]
struct NicknameQuery {
    nickname: String,
}

fn profile(id: &str, nickname: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        nickname: nickname.to_string(),
        email: format!("{}@example.com", nickname),
        about: None,
        phone: None,
        avatar_url: None,
    }
}

async fn get_user(req: HttpRequest, state: State, query: web::Query<IdQuery>) -> HttpResponse {
    require_auth!(req, state);
    match query.id.as_str() {
        "u1" => HttpResponse::Ok().json(profile("u1", "alice")),
        "u2" => HttpResponse::Ok().json(profile("u2", "bob")),
        _ => HttpResponse::NotFound().body("user not found"),
    }
}

async fn search_users(req: HttpRequest, state: State, query: web::Query<NicknameQuery>) -> HttpResponse {
    require_auth!(req, state);
    let users: Vec<UserProfile> = [profile("u1", "alice"), profile("u2", "bob")]
        .into_iter()
        .filter(|u| u.nickname.contains(&query.nickname))
        .collect();
    HttpResponse::Ok().json(users)
}

async fn update_profile(req: HttpRequest, state: State, body: web::Json<Value>) -> HttpResponse {
    require_auth!(req, state);
    let mut user = profile("u1", "alice");
    user.about = body.get("about").and_then(Value::as_str).map(str::to_string);
    HttpResponse::Ok().json(user)
}

async fn friends(req: HttpRequest, state: State) -> HttpResponse {
    require_auth!(req, state);
    HttpResponse::Ok().json(vec![profile("u2", "bob")])
}

async fn friend_requests(req: HttpRequest, state: State) -> HttpResponse {
    require_auth!(req, state);
    HttpResponse::Ok().json(json!([{
        "id": "r1",
        "sender": profile("u3", "carol"),
        "status": "pending",
        "created_at": "2024-05-01T10:00:00Z"
    }]))
}

async fn contact_action(req: HttpRequest, state: State, path: web::Path<(String, String)>) -> HttpResponse {
    require_auth!(req, state);
    let (action, user) = path.into_inner();
    state.friend_requests.lock().unwrap().push((action, user));
    HttpResponse::Ok().finish()
}

async fn list_chats(req: HttpRequest, state: State) -> HttpResponse {
    require_auth!(req, state);
    let chats = state.chats.lock().unwrap().clone();
    HttpResponse::Ok().json(chats)
}

async fn get_chat(req: HttpRequest, state: State, path: web::Path<String>) -> HttpResponse {
    require_auth!(req, state);
    let id = path.into_inner();
    let chats = state.chats.lock().unwrap();
    match chats.iter().find(|c| c.id.as_str() == id) {
        Some(chat) => HttpResponse::Ok().json(chat),
        None => HttpResponse::NotFound().body("chat not found"),
    }
}

async fn create_chat(req: HttpRequest, state: State, body: web::Json<CreateChatRequest>) -> HttpResponse {
    require_auth!(req, state);
    let now = Utc::now();
    let chat = Conversation {
        id: ChatId::new(state.next_id("c")),
        name: body.name.clone(),
        is_group: body.is_group,
        participants: body.participants.clone(),
        last_message: None,
        created_at: now,
        updated_at: now,
    };
    state.chats.lock().unwrap().push(chat.clone());
    HttpResponse::Ok().json(chat)
}

async fn rename_chat(
    req: HttpRequest,
    state: State,
    path: web::Path<String>,
    body: web::Json<RenameChatRequest>,
) -> HttpResponse {
    require_auth!(req, state);
    let id = path.into_inner();
    let mut chats = state.chats.lock().unwrap();
    match chats.iter_mut().find(|c| c.id.as_str() == id) {
        Some(chat) => {
            chat.name = body.name.clone();
            chat.updated_at = Utc::now();
            HttpResponse::Ok().json(chat.clone())
        }
        None => HttpResponse::NotFound().body("chat not found"),
    }
}

async fn delete_chat(req: HttpRequest, state: State, path: web::Path<String>) -> HttpResponse {
    require_auth!(req, state);
    let id = path.into_inner();
    state.chats.lock().unwrap().retain(|c| c.id.as_str() != id);
    HttpResponse::NoContent().finish()
}

async fn chat_member(req: HttpRequest, state: State, path: web::Path<(String, String)>) -> HttpResponse {
    require_auth!(req, state);
    let (chat_id, user) = path.into_inner();
    let mut chats = state.chats.lock().unwrap();
    let Some(chat) = chats.iter_mut().find(|c| c.id.as_str() == chat_id) else {
        return HttpResponse::NotFound().body("chat not found");
    };
    if req.method() == actix_web::http::Method::DELETE {
        chat.participants.retain(|p| p != &user);
    } else if !chat.participants.contains(&user) {
        chat.participants.push(user);
    }
    HttpResponse::Ok().finish()
}

async fn list_messages(req: HttpRequest, state: State, path: web::Path<String>) -> HttpResponse {
    require_auth!(req, state);
    let chat = path.into_inner();
    let messages = state
        .messages
        .lock()
        .unwrap()
        .get(&chat)
        .cloned()
        .unwrap_or_default();
    HttpResponse::Ok().json(messages)
}

async fn post_message(
    req: HttpRequest,
    state: State,
    path: web::Path<String>,
    body: web::Json<SendMessageRequest>,
) -> HttpResponse {
    require_auth!(req, state);
    let chat = path.into_inner();
    let mut message = message_at(&state.next_id("m"), &chat, &body.content, Utc::now());
    message.sender_id = TEST_USER_ID.to_string();
    message.client_id = body.client_id.clone();
    state
        .messages
        .lock()
        .unwrap()
        .entry(chat)
        .or_default()
        .push(message.clone());
    HttpResponse::Ok().json(message)
}

async fn edit_message(
    req: HttpRequest,
    state: State,
    path: web::Path<String>,
    body: web::Json<EditMessageRequest>,
) -> HttpResponse {
    require_auth!(req, state);
    let id = path.into_inner();
    let mut messages = state.messages.lock().unwrap();
    let found = messages
        .values_mut()
        .flatten()
        .find(|m| m.id.as_str() == id);
    match found {
        Some(message) => {
            message.content = body.content.clone();
            message.updated_at = Utc::now();
            HttpResponse::Ok().json(message.clone())
        }
        None => HttpResponse::NotFound().body("message not found"),
    }
}

async fn delete_message(req: HttpRequest, state: State, path: web::Path<String>) -> HttpResponse {
    require_auth!(req, state);
    let id = path.into_inner();
    for messages in state.messages.lock().unwrap().values_mut() {
        messages.retain(|m| m.id.as_str() != id);
    }
    HttpResponse::NoContent().finish()
}

/// Start the mock backend on a random local port.
/// Returns the base URL and the shared state.
pub fn spawn_backend() -> (String, State) {
    let state = web::Data::new(BackendState::default());
    let app_state = state.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .route("/auth/login", web::post().to(login))
            .route("/auth/register", web::post().to(register))
            .route("/users/getByID", web::get().to(get_user))
            .route("/users/search", web::get().to(search_users))
            .route("/users/profile/update", web::put().to(update_profile))
            .route("/contacts/friends", web::get().to(friends))
            .route("/contacts/requests", web::get().to(friend_requests))
            .route("/contacts/{action}/{user}", web::post().to(contact_action))
            .route("/chats", web::get().to(list_chats))
            .route("/chats", web::post().to(create_chat))
            .route("/chats/{id}", web::get().to(get_chat))
            .route("/chats/{id}", web::put().to(rename_chat))
            .route("/chats/{id}", web::delete().to(delete_chat))
            .route("/chats/{id}/users/{user}", web::post().to(chat_member))
            .route("/chats/{id}/users/{user}", web::delete().to(chat_member))
            .route("/chats/{id}/messages", web::get().to(list_messages))
            .route("/chats/{id}/messages", web::post().to(post_message))
            .route("/messages/{id}", web::put().to(edit_message))
            .route("/messages/{id}", web::delete().to(delete_message))
    })
    .workers(1)
    .bind("127.0.0.1:0")
    .expect("Failed to bind mock backend");

    let addr = server
        .addrs()
        .first()
        .copied()
        .expect("No bind address found");
    tokio::spawn(server.run());

    (format!("http://{}", addr), state)
}
