use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let sessions = state.sessions.count().await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Repo Rover is running",
            "status": "ok",
            "sessions": sessions,
        })),
    )
}
