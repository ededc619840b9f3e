use rover_agents::Orchestrator;
use rover_store::{SessionHandle, SessionStore};
use std::sync::Arc;

use crate::error::ApiError;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: SessionStore,
}

impl ApiState {
    /// State whose sessions expire after the configured idle time.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let sessions = SessionStore::new(orchestrator.settings().session_ttl);
        Self {
            orchestrator,
            sessions,
        }
    }

    pub async fn session(&self, id: &str) -> Result<SessionHandle, ApiError> {
        Ok(self.sessions.get(id).await?)
    }
}
