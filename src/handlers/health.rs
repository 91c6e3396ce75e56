//! Infrastructure health probe.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.to_string(),
        "features": {
            "identification": state.config.identification_enabled(),
            "transcripts": state.config.transcripts_enabled(),
            "email": state.config.email_enabled(),
            "handoff_dial": state.config.transfer_number.is_some(),
        },
    }))
}
