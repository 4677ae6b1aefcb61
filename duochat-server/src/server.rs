//! HTTP routes, the `/ws` channel, and frame routing between connections.
//!
//! Every request except register and login carries the session token in the
//! `Authorization` header. Each accepted WebSocket belongs to the identity
//! its token names; a frame whose sender is anyone else is dropped. Routed
//! frames go to the receiver's connection (if any) and back to the sender,
//! so the sender sees its correlation ID echoed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use duochat_proto::api::{
    Credentials, LoginResponse, LoginUser, MessagesResponse, UsersResponse, ValidateTokenResponse,
};
use duochat_proto::frame::{self, ChatFrame, Frame};
use duochat_proto::identity::Identity;

use crate::store::{ChatStore, StoreError};

/// Default cap on message content, in bytes.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Error returned by an HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, unknown or revoked token; or bad credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller may not read this resource.
    #[error("forbidden")]
    Forbidden,

    /// Registration rejected.
    #[error(transparent)]
    Registration(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Registration(StoreError::UserExists(_)) => StatusCode::CONFLICT,
            Self::Registration(StoreError::BlankCredentials) => StatusCode::BAD_REQUEST,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

struct Connection {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared server state: the store plus one live connection per identity.
pub struct ServerState {
    /// Accounts, tokens, contacts and history.
    pub store: ChatStore,
    connections: RwLock<HashMap<Identity, Connection>>,
    next_connection: AtomicU64,
    max_message_len: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Empty state with the default message size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_message_len(DEFAULT_MAX_MESSAGE_LEN)
    }

    /// Empty state rejecting content longer than `max_message_len` bytes.
    #[must_use]
    pub fn with_max_message_len(max_message_len: usize) -> Self {
        Self {
            store: ChatStore::new(),
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            max_message_len,
        }
    }

    /// Registers a connection for `identity`, replacing any previous one.
    /// Returns the new connection's id.
    async fn register(&self, identity: &Identity, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let old = self
            .connections
            .write()
            .await
            .insert(identity.clone(), Connection { id, sender });
        if old.is_some() {
            tracing::info!(identity = %identity, "replaced existing connection");
        }
        id
    }

    /// Removes `identity`'s connection if it is still connection `id`.
    async fn unregister(&self, identity: &Identity, id: u64) {
        let mut conns = self.connections.write().await;
        if conns.get(identity).is_some_and(|c| c.id == id) {
            conns.remove(identity);
        }
    }

    /// Whether `identity` has a live connection.
    pub async fn is_connected(&self, identity: &Identity) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends a close frame with `code` to every connection.
    pub async fn close_all_connections(&self, code: u16) {
        let conns = self.connections.read().await;
        for (identity, conn) in conns.iter() {
            tracing::info!(identity = %identity, code, "sending close frame");
            let _ = conn.sender.send(Message::Close(Some(CloseFrame {
                code,
                reason: "server closing".into(),
            })));
        }
    }

    async fn send_to(&self, identity: &Identity, text: &str) -> bool {
        let conns = self.connections.read().await;
        conns
            .get(identity)
            .is_some_and(|c| c.sender.send(Message::Text(text.to_owned().into())).is_ok())
    }

    async fn authorize(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
            .ok_or(ApiError::Unauthorized)?;
        self.store
            .validate(token)
            .await
            .ok_or(ApiError::Unauthorized)
    }
}

/// Builds the router over `state`.
pub fn router(state: Arc<ServerState>) -> axum::Router {
    axum::Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/validate-token", get(validate_token))
        .route("/friends", get(friends))
        .route("/users", get(users))
        .route("/messages/{sender}/{receiver}", get(messages))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Starts the server on a fresh state.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-built [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn register(
    State(state): State<Arc<ServerState>>,
    Json(credentials): Json<Credentials>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .register(&credentials.username, &credentials.password)
        .await
        .inspect_err(|e| tracing::warn!(username = %credentials.username, err = %e, "registration refused"))?;
    Ok(StatusCode::CREATED)
}

async fn login(
    State(state): State<Arc<ServerState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(token) = state
        .store
        .login(&credentials.username, &credentials.password)
        .await
    else {
        tracing::warn!(username = %credentials.username, "login refused");
        return Err(ApiError::Unauthorized);
    };
    tracing::info!(username = %credentials.username, "login");
    Ok(Json(LoginResponse {
        user: LoginUser { token },
    }))
}

async fn validate_token(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<ValidateTokenResponse>, ApiError> {
    let username = state.authorize(&headers).await?;
    Ok(Json(ValidateTokenResponse { username }))
}

async fn friends(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<UsersResponse>, ApiError> {
    let caller = state.authorize(&headers).await?;
    let users = state.store.contacts(&caller).await;
    Ok(Json(UsersResponse { users }))
}

async fn users(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<UsersResponse>, ApiError> {
    state.authorize(&headers).await?;
    let users = state.store.users().await;
    Ok(Json(UsersResponse { users }))
}

async fn messages(
    State(state): State<Arc<ServerState>>,
    Path((sender, receiver)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<MessagesResponse>, ApiError> {
    let caller = state.authorize(&headers).await?;
    let (sender, receiver) = (Identity::new(sender), Identity::new(receiver));
    if caller != sender && caller != receiver {
        return Err(ApiError::Forbidden);
    }
    let messages = state.store.history(&sender, &receiver).await;
    Ok(Json(MessagesResponse { messages }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = state.authorize(&headers).await.inspect_err(|_| {
        tracing::warn!("WebSocket upgrade without a valid token");
    })?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

/// Runs one authenticated connection until either side closes.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, identity: Identity) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.register(&identity, tx).await;
    tracing::info!(identity = %identity, "channel open");

    let writer_identity = identity.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(identity = %writer_identity, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_identity = identity.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&reader_identity, text.as_str(), &reader_state).await;
                }
                Message::Close(frame) => {
                    let code = frame.as_ref().map(|f| f.code);
                    tracing::info!(identity = %reader_identity, ?code, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&identity, conn_id).await;
    tracing::info!(identity = %identity, "channel closed");
}

async fn handle_text(identity: &Identity, text: &str, state: &ServerState) {
    let chat = match frame::decode_frame(text) {
        Ok(Frame::Message(chat)) => chat,
        Err(e) => {
            tracing::warn!(identity = %identity, err = %e, "dropping malformed frame");
            return;
        }
    };

    if &chat.sender_id != identity {
        tracing::warn!(
            identity = %identity,
            claimed = %chat.sender_id,
            "sender does not match connection, dropping"
        );
        return;
    }
    if chat.content.trim().is_empty() || chat.content.len() > state.max_message_len {
        tracing::warn!(identity = %identity, len = chat.content.len(), "content rejected");
        return;
    }
    if !state.store.exists(&chat.receiver_id).await {
        tracing::warn!(identity = %identity, receiver = %chat.receiver_id, "unknown receiver");
        return;
    }

    route(state, &chat).await;
}

async fn route(state: &ServerState, chat: &ChatFrame) {
    let text = match frame::encode_frame(&Frame::Message(chat.clone())) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(err = %e, "could not re-encode frame");
            return;
        }
    };
    state.store.record(chat).await;

    let delivered = state.send_to(&chat.receiver_id, &text).await;
    tracing::debug!(from = %chat.sender_id, to = %chat.receiver_id, delivered, "frame routed");
    if chat.receiver_id != chat.sender_id {
        state.send_to(&chat.sender_id, &text).await;
    }
}
