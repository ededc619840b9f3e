use axum::{extract::State, Json};
use rover_agents::{SearchOutcome, SelectOutcome};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{detached, failure, required, success};
use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Option number (`2`, `"2"`) or `"cancel"`
    #[serde(default)]
    pub selection: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub arxiv_id: Option<String>,
}

pub async fn search_paper(
    State(state): State<ApiState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let query = required(body.query, "query")?;
    let handle = state.session(&session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let (result, session_state) = detached(async move {
        let mut session = handle.lock().await;
        let result = orchestrator.submit_query(&mut session, &query).await;
        (result, session.state)
    })
    .await?;

    match result {
        Ok(SearchOutcome::NeedsSelection { options, message }) => success(
            message,
            json!({ "needs_selection": true, "options": options, "state": session_state }),
        ),
        Ok(SearchOutcome::Ready(outcome)) => {
            let message = outcome.message.clone();
            let mut body = success(message, &outcome)?;
            body["needs_selection"] = Value::Bool(false);
            body["state"] = json!(session_state);
            Ok(body)
        }
        Err(err) => failure(err, session_state),
    }
}

pub async fn select_paper(
    State(state): State<ApiState>,
    Json(body): Json<SelectRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let selection = match body.selection {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(_) => {
            return Err(ApiError::Validation(
                "selection must be an option number or \"cancel\"".to_string(),
            ))
        }
        None => return Err(ApiError::Validation("selection is required".to_string())),
    };
    let handle = state.session(&session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let (result, session_state) = detached(async move {
        let mut session = handle.lock().await;
        let result = orchestrator.select(&mut session, &selection).await;
        (result, session.state)
    })
    .await?;

    match result {
        Ok(SelectOutcome::Ready(outcome)) => {
            let message = outcome.message.clone();
            let mut body = success(message, &outcome)?;
            body["state"] = json!(session_state);
            Ok(body)
        }
        Ok(SelectOutcome::Dropped { cancelled, message }) => success(
            message,
            json!({ "cancelled": cancelled, "state": session_state }),
        ),
        Err(err) => failure(err, session_state),
    }
}

pub async fn init_paper(
    State(state): State<ApiState>,
    Json(body): Json<InitRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let arxiv_id = required(body.arxiv_id, "arxiv_id")?;
    let handle = state.session(&session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let (result, session_state) = detached(async move {
        let mut session = handle.lock().await;
        let result = orchestrator.initialize(&mut session, &arxiv_id).await;
        (result, session.state)
    })
    .await?;

    match result {
        Ok(outcome) => {
            let message = outcome.message.clone();
            let mut body = success(message, &outcome)?;
            body["state"] = json!(session_state);
            Ok(body)
        }
        Err(err) => failure(err, session_state),
    }
}
