//! Describes the synced state models so a viewer can generate its client.

use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
use creatorpay_schema::{BackendState, RemoteAction, BACKEND_STATE_KEY};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SyncedModel {
    pub key: &'static str,
    /// Top-level keys of the tree as sent in `set` frames, with empty values
    pub shape: serde_json::Value,
    pub actions: &'static [&'static str],
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(all_models))
        .route("/{key}", get(model))
}

fn backend_state_model() -> SyncedModel {
    SyncedModel {
        key: BACKEND_STATE_KEY,
        shape: serde_json::to_value(BackendState::default()).unwrap_or_default(),
        actions: RemoteAction::NAMES,
    }
}

async fn all_models() -> Json<Vec<SyncedModel>> {
    Json(vec![backend_state_model()])
}

async fn model(Path(key): Path<String>) -> Result<Json<SyncedModel>, StatusCode> {
    if key == BACKEND_STATE_KEY {
        Ok(Json(backend_state_model()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
