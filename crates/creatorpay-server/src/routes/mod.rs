pub mod health;
pub mod schema;
pub mod sessions;
pub mod ws;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/health", health::router())
        .nest("/schema", schema::router())
        .nest("/sessions", sessions::router())
}
