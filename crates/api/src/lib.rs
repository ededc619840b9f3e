//! HTTP surface for Repo Rover
//!
//! Every endpoint answers with a JSON object carrying `success` and `message`.
//! Session work runs on its own task so a dropped connection never leaves a
//! session half-initialised.

use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

pub mod api_state;
pub mod error;
pub mod routes;

pub use api_state::ApiState;
pub use error::ApiError;

use routes::{
    cache::{cache_stats, clear_cache, delete_cached_paper},
    chat::{chat, example, explain},
    health::health,
    paper::{init_paper, search_paper, select_paper},
    session::{create_session, reset_session, session_paper, session_status, suggestions},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub fn api_routes(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/session", post(create_session))
        .route("/api/session/{id}/status", get(session_status))
        .route("/api/session/{id}/paper", get(session_paper))
        .route("/api/session/{id}/suggestions", get(suggestions))
        .route("/api/reset", post(reset_session))
        .route("/api/search-paper", post(search_paper))
        .route("/api/select-paper", post(select_paper))
        .route("/api/init-paper", post(init_paper))
        .route("/api/chat", post(chat))
        .route("/api/explain", post(explain))
        .route("/api/example", post(example))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/{arxiv_id}", delete(delete_cached_paper))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `bind` until the process is stopped.
pub async fn serve(state: ApiState, bind: &str) -> std::io::Result<()> {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired().await;
            if removed > 0 {
                debug!("Expired {} idle sessions", removed);
            }
        }
    });

    let app = api_routes(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Repo Rover API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}
