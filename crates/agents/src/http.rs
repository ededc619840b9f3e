//! Request helpers shared by the hosted-service clients.

use crate::{AgentError, Result};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::debug;

const MAX_ERROR_BODY_CHARS: usize = 300;

/// Send a request and decode a JSON body, mapping failures to the error taxonomy.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &'static str,
    request: RequestBuilder,
) -> Result<T> {
    let response = send_checked(service, request).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AgentError::from_transport(service, e))?;
    serde_json::from_slice(&bytes).map_err(|e| AgentError::MalformedResponse {
        service,
        detail: e.to_string(),
    })
}

/// Send a request and return the raw body.
pub(crate) async fn send_bytes(service: &'static str, request: RequestBuilder) -> Result<Vec<u8>> {
    let response = send_checked(service, request).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AgentError::from_transport(service, e))?;
    Ok(bytes.to_vec())
}

async fn send_checked(
    service: &'static str,
    request: RequestBuilder,
) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| AgentError::from_transport(service, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    debug!("{} returned {}: {}", service, status, detail);
    Err(AgentError::from_status(service, status.as_u16(), detail))
}
