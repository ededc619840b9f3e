use axum::{
    extract::{Path, State},
    Json,
};
use rover_core::normalize_arxiv_id;
use rover_store::StoreError;
use serde_json::{json, Value};

use super::success;
use crate::{api_state::ApiState, error::ApiError};

pub async fn cache_stats(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let stats = state.orchestrator.cache().stats().await;
    let message = format!("{} cached papers", stats.total_papers);
    success(message, stats)
}

pub async fn delete_cached_paper(
    State(state): State<ApiState>,
    Path(arxiv_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let arxiv_id = normalize_arxiv_id(&arxiv_id);
    if !state.orchestrator.cache().delete(&arxiv_id).await? {
        return Err(StoreError::EntryNotFound(arxiv_id).into());
    }
    success(
        format!("Removed {} from the cache", arxiv_id),
        json!({ "arxiv_id": arxiv_id }),
    )
}

pub async fn clear_cache(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let removed = state.orchestrator.cache().clear_all().await?;
    success(
        format!("Cleared {} cached papers", removed),
        json!({ "removed": removed }),
    )
}
