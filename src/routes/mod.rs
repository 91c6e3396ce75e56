//! Router assembly.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, media, webhook};
use crate::state::AppState;

/// Build the full application router:
///
/// - `POST /voice/incoming` — carrier call-start webhook
/// - `POST /call-status` — dial status callback
/// - `GET /media-stream` — carrier media WebSocket
/// - `GET /health` — infrastructure probe
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/voice/incoming", post(webhook::voice_webhook))
        .route("/call-status", post(webhook::call_status_webhook))
        .route("/media-stream", get(media::media_stream_handler))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
