pub mod cache;
pub mod chat;
pub mod health;
pub mod paper;
pub mod session;

use axum::Json;
use rover_agents::AgentError;
use rover_core::{CoreError, SessionState};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;

use crate::error::ApiError;

/// `{"success": true, "message": ...}` merged with the fields of `payload`.
pub(crate) fn success(
    message: impl Into<String>,
    payload: impl Serialize,
) -> Result<Json<Value>, ApiError> {
    let mut body = json!({ "success": true });
    if let Value::Object(fields) = serde_json::to_value(payload)? {
        if let Value::Object(target) = &mut body {
            target.extend(fields);
        }
    }
    body["message"] = Value::String(message.into());
    Ok(Json(body))
}

/// Map an orchestrator failure. Problems with the request itself become error
/// statuses; failures the user can act on are reported with `success: false`.
pub(crate) fn failure(err: AgentError, state: SessionState) -> Result<Json<Value>, ApiError> {
    match &err {
        AgentError::Core(CoreError::InvalidTransition { .. }) => {
            Err(ApiError::Conflict(err.user_message()))
        }
        AgentError::Core(_) => Err(ApiError::Validation(err.user_message())),
        AgentError::Store(_) | AgentError::Io(_) => {
            tracing::error!("Internal error: {}", err);
            Err(ApiError::Internal(err.to_string()))
        }
        _ => {
            tracing::warn!("Request failed: {}", err);
            Ok(Json(json!({
                "success": false,
                "message": err.user_message(),
                "state": state,
            })))
        }
    }
}

/// Trimmed value of a required body field.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation(format!("{} is required", field)))
}

/// Run session work on its own task so it finishes even if the client goes away.
pub(crate) async fn detached<F, T>(work: F) -> Result<T, ApiError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work).await.map_err(|err| {
        tracing::error!("Session task failed: {}", err);
        ApiError::Internal(err.to_string())
    })
}
