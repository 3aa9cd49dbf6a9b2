use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use creatorpay_core::SessionSummary;
use creatorpay_schema::BackendState;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{id}", delete(remove_session))
        .route("/{id}/state", get(session_state))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list().await)
}

async fn session_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BackendState>, StatusCode> {
    let session = state.sessions.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let snapshot = session.state.snapshot().await;
    Ok(Json(BackendState::clone(&snapshot)))
}

async fn remove_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.sessions.remove(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
