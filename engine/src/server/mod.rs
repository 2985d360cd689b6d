//! JSON API
//!
//! Exposes the conversation driver over HTTP. Each session owns its own
//! [`Conversation`] behind a `tokio::sync::Mutex`, so turns on one session
//! run one at a time while other sessions proceed independently. Sessions
//! live in memory only.
//!
//! # Endpoints
//!
//! - POST /api/sessions - Start a conversation
//! - POST /api/sessions/:id/messages - Submit a turn
//! - GET /api/sessions/:id/history - Transcript without the system prompt
//! - DELETE /api/sessions/:id/history - Clear the conversation
//! - DELETE /api/sessions/:id - Drop the session
//! - GET /api/status - Backend and session count

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use sdk::errors::{EngineError, ErrorHint};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::driver::{ConversationDriver, TurnOutcome};
use crate::llm::{ErrorKind, Message};

/// Session cap used when none is configured
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Idle time after which a session is dropped, when none is configured
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);

struct SessionEntry {
    conversation: Arc<Mutex<Conversation>>,
    last_used: Instant,
}

impl SessionEntry {
    fn is_expired(&self, idle: Duration) -> bool {
        self.last_used.elapsed() >= idle
    }
}

/// In-memory conversations keyed by session id.
///
/// The store holds at most `max_sessions` entries. Sessions untouched for
/// longer than `idle` are dropped, and when the store is full the least
/// recently used session makes room for a new one.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    max_sessions: usize,
    idle: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cap of 0 is treated as 1
    pub fn with_limits(max_sessions: usize, idle: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            idle,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub async fn create(&self, conversation: Conversation) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;

        let expired = purge_expired(&mut sessions, self.idle);
        if expired > 0 {
            tracing::info!("Dropped {} idle session(s)", expired);
        }

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => {
                    sessions.remove(&oldest);
                    tracing::info!("Session limit reached, evicted session {}", oldest);
                }
                None => break,
            }
        }

        sessions.insert(
            id,
            SessionEntry {
                conversation: Arc::new(Mutex::new(conversation)),
                last_used: Instant::now(),
            },
        );
        id
    }

    /// Look up a session and mark it as used. Expired sessions are removed.
    pub async fn get(&self, id: Uuid) -> Result<Arc<Mutex<Conversation>>, EngineError> {
        let mut sessions = self.sessions.write().await;

        let expired = match sessions.get(&id) {
            Some(entry) => entry.is_expired(self.idle),
            None => return Err(EngineError::SessionNotFound(id.to_string())),
        };
        if expired {
            sessions.remove(&id);
            tracing::info!("Session {} expired", id);
            return Err(EngineError::SessionNotFound(id.to_string()));
        }

        match sessions.get_mut(&id) {
            Some(entry) => {
                entry.last_used = Instant::now();
                Ok(entry.conversation.clone())
            }
            None => Err(EngineError::SessionNotFound(id.to_string())),
        }
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), EngineError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    /// Drop every session idle for longer than the configured limit
    pub async fn purge_idle(&self) -> usize {
        purge_expired(&mut *self.sessions.write().await, self.idle)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn purge_expired(sessions: &mut HashMap<Uuid, SessionEntry>, idle: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, entry| !entry.is_expired(idle));
    before - sessions.len()
}

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    driver: Arc<ConversationDriver>,
    sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(driver: Arc<ConversationDriver>) -> Self {
        Self::with_store(driver, SessionStore::new())
    }

    pub fn with_store(driver: Arc<ConversationDriver>, sessions: SessionStore) -> Self {
        Self {
            driver,
            sessions: Arc::new(sessions),
        }
    }
}

/// Error wrapper that renders as a JSON body
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.0.user_hint(),
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Assistant reply, or the user-facing error text
    pub reply: String,

    /// Set when the reply is an error explanation
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorKind>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/api/sessions/:id/messages", post(submit_turn))
        .route(
            "/api/sessions/:id/history",
            get(get_history).delete(clear_history),
        )
        .route("/api/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<(), EngineError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| EngineError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    let local = listener
        .local_addr()
        .map_err(|e| EngineError::Server(format!("Failed to get local address: {}", e)))?;
    tracing::info!("API server listening on http://{}", local);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| EngineError::Server(e.to_string()))?;

    tracing::info!("API server shut down");
    Ok(())
}

async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let id = state
        .sessions
        .create(state.driver.new_conversation())
        .await;
    tracing::info!("Session {} created", id);
    (StatusCode::CREATED, Json(SessionCreated { id }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.remove(id).await?;
    tracing::info!("Session {} removed", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_turn(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TurnRequest>,
) -> Result<Response, ApiError> {
    let session = state.sessions.get(id).await?;
    let mut conversation = session.lock().await;

    let response = match state.driver.submit_turn(&mut conversation, &request.text).await {
        TurnOutcome::Ignored => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Message is empty" })),
            )
                .into_response())
        }
        TurnOutcome::Replied(reply) => TurnResponse { reply, error: None },
        TurnOutcome::Failed { kind, text } => TurnResponse {
            reply: text,
            error: Some(kind),
        },
    };

    Ok(Json(response).into_response())
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let session = state.sessions.get(id).await?;
    let history = session.lock().await.displayable_history();
    Ok(Json(history))
}

async fn clear_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let session = state.sessions.get(id).await?;
    state.driver.clear_conversation(&mut *session.lock().await);
    Ok(StatusCode::NO_CONTENT)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let provider = state.driver.provider();
    Json(json!({
        "backend": provider.name(),
        "model": provider.model(),
        "local": provider.is_local(),
        "history_window": state.driver.settings().history_window,
        "sessions": state.sessions.len().await,
        "max_sessions": state.sessions.max_sessions(),
    }))
}
