//! Dialogue WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::dialogue::dialogue_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the dialogue WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for one speech dialogue session
///
/// # Example
///
/// ```json
/// // Client starts a session
/// {"type": "start"}
///
/// // Server responds once the upstream session is live
/// {"type": "session_started", "sessionId": "..."}
/// ```
pub fn create_dialogue_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(dialogue_handler))
        .layer(TraceLayer::new_for_http())
}
