use std::convert::Infallible;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    models::Turn,
    session::{SessionHandle, SessionState, WELCOME_MESSAGE},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct MessagePayload {
    message: String,
}

#[derive(Serialize)]
pub struct SessionCreated {
    session_id: SessionHandle,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    welcome: &'static str,
}

#[derive(Serialize)]
pub struct SessionView {
    session_id: SessionHandle,
    state: &'static str,
    turns: Vec<Turn>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(end_session_handler),
        )
        .route("/api/sessions/:id/messages", post(message_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn session_not_found(id: Uuid) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("La sesión {} no existe.", id)})),
    )
}

// --- Handlers ---

#[axum::debug_handler]
async fn create_session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.sessions.create().await;
    let session_state = session.state();
    let error = match &session_state {
        SessionState::Failed(reason) => Some(reason.clone()),
        _ => None,
    };

    (
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.handle(),
            state: session_state.name(),
            error,
            welcome: WELCOME_MESSAGE,
        }),
    )
}

#[axum::debug_handler]
async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .sessions
        .get(SessionHandle::new(id))
        .ok_or_else(|| session_not_found(id))?;

    Ok(Json(SessionView {
        session_id: session.handle(),
        state: session.state().name(),
        turns: session.turns(),
    }))
}

/// Respuesta en streaming: un evento `token` por fragmento y un `done` final.
/// Si el cliente se desconecta se cierra el canal y la generación se cancela.
#[axum::debug_handler]
async fn message_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MessagePayload>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state
        .sessions
        .on_user_message(SessionHandle::new(id), &payload.message)
        .ok_or_else(|| session_not_found(id))?;

    Ok(Sse::new(token_events(rx)).keep_alive(KeepAlive::default()))
}

fn token_events(rx: mpsc::Receiver<String>) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(token) => Some((Ok(Event::default().event("token").data(token)), Some(rx))),
            None => Some((Ok(Event::default().event("done").data("")), None)),
        }
    })
}

#[axum::debug_handler]
async fn end_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.on_session_end(SessionHandle::new(id)) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let engine = state.sessions.engine();
    Json(Status {
        collection: engine.store().collection().to_string(),
        model: engine.model_id().to_string(),
        live_sessions: state.sessions.len(),
        points_in_collection: engine.store().count().await.ok(),
    })
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}
