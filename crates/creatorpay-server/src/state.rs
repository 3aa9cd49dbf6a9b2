use std::sync::Arc;

use creatorpay_core::SessionManager;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Owner of every live session and the shared content source
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}
