use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required, success};
use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn create_session(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let (session_id, _) = state.sessions.create().await;
    success(
        "Session created. Search for a paper to begin.",
        json!({ "session_id": session_id }),
    )
}

pub async fn session_status(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.session(&session_id).await?;
    let status = {
        let session = handle.lock().await;
        state.orchestrator.status(&session)
    };
    let message = format!("Session is {}", status.state);
    success(message, status)
}

pub async fn session_paper(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.session(&session_id).await?;
    let session = handle.lock().await;

    match &session.paper {
        Some(paper) => success(
            paper.title.clone(),
            json!({
                "paper": paper,
                "repo_url": session.repo.as_ref().map(|r| r.url.clone()),
                "state": session.state,
            }),
        ),
        None => Ok(Json(json!({
            "success": false,
            "message": "No paper has been selected in this session.",
            "paper": null,
            "state": session.state,
        }))),
    }
}

pub async fn reset_session(
    State(state): State<ApiState>,
    Json(body): Json<SessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = required(body.session_id, "session_id")?;
    let handle = state.session(&session_id).await?;
    {
        let mut session = handle.lock().await;
        state.orchestrator.reset(&mut session);
    }
    success(
        "Session reset. Search for a paper to begin.",
        json!({ "session_id": session_id }),
    )
}

/// Starter questions for the session's ready paper.
pub async fn suggestions(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.session(&session_id).await?;
    let session = handle.lock().await;
    match state.orchestrator.suggest_questions(&session) {
        Ok(questions) => success("", json!({ "questions": questions })),
        Err(err) => super::failure(err, session.state),
    }
}
