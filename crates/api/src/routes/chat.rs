use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{detached, failure, required, success};
use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub concept: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExampleRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

pub async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let question = required(body.message, "message")?;
    let handle = state.session(&session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let (result, session_state) = detached(async move {
        let mut session = handle.lock().await;
        let result = orchestrator.ask(&mut session, &question).await;
        (result, session.state)
    })
    .await?;

    match result {
        Ok(answer) => success("", answer),
        Err(err) => failure(err, session_state),
    }
}

pub async fn explain(
    State(state): State<ApiState>,
    Json(body): Json<ExplainRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let concept = required(body.concept, "concept")?;
    let handle = state.session(&session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let (result, session_state) = detached(async move {
        let mut session = handle.lock().await;
        let result = orchestrator.explain(&mut session, &concept).await;
        (result, session.state)
    })
    .await?;

    match result {
        Ok(explanation) => success("", explanation),
        Err(err) => failure(err, session_state),
    }
}

pub async fn example(
    State(state): State<ApiState>,
    Json(body): Json<ExampleRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let target = required(body.target, "target")?;
    let handle = state.session(&session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let requested = target.clone();
    let (result, session_state) = detached(async move {
        let mut session = handle.lock().await;
        let result = orchestrator.example(&mut session, &requested).await;
        (result, session.state)
    })
    .await?;

    match result {
        Ok(code) => success("", json!({ "target": target, "code": code })),
        Err(err) => failure(err, session_state),
    }
}
