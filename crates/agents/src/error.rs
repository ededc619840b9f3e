//! Agent error types
//!
//! Mirrors the failure taxonomy callers act on: configuration problems are
//! fatal at startup, `NotFound` is a user-visible miss, service failures are
//! recoverable at the call site, and malformed output is always replaced by a
//! fallback before it reaches a user.

use rover_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{service} rejected the credentials")]
    Auth { service: &'static str },

    #[error("{service} quota exhausted")]
    Quota { service: &'static str },

    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("{service} unavailable: {detail}")]
    Unavailable { service: &'static str, detail: String },

    #[error("{service} rejected the request ({status}): {detail}")]
    Rejected {
        service: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Malformed response from {service}: {detail}")]
    MalformedResponse { service: &'static str, detail: String },

    #[error("Clone of {url} failed: {detail}")]
    CloneFailed { url: String, detail: String },

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] rover_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Map a transport-level failure from one of the hosted services.
    pub fn from_transport(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { service };
        }
        if let Some(status) = err.status() {
            return Self::from_status(service, status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::MalformedResponse {
                service,
                detail: err.to_string(),
            };
        }
        Self::Unavailable {
            service,
            detail: err.to_string(),
        }
    }

    /// Map a non-success HTTP status.
    pub fn from_status(service: &'static str, status: u16, detail: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Auth { service },
            429 => Self::Quota { service },
            500..=599 => Self::Unavailable {
                service,
                detail: format!("status {}", status),
            },
            _ => Self::Rejected {
                service,
                status,
                detail: detail.into(),
            },
        }
    }

    /// Failures that leave a session in `ERROR` until it is reset.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Auth { .. } | Self::CloneFailed { .. }
        )
    }

    /// Text that is safe to show an end user. Never includes provider bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) => {
                "The server is missing required configuration. Check the API keys.".to_string()
            }
            Self::NotFound(what) => what.clone(),
            Self::Auth { service } => format!(
                "Authentication with {} failed. Check the API key, then reset the session.",
                service
            ),
            Self::Quota { service } => {
                format!("{} quota is exhausted. Please try again later.", service)
            }
            Self::Timeout { service } => {
                format!("{} took too long to respond. Please try again.", service)
            }
            Self::Unavailable { service, .. } | Self::Rejected { service, .. } => {
                format!("{} is not available right now. Please try again.", service)
            }
            Self::MalformedResponse { service, .. } => {
                format!("{} returned an unexpected response. Please try again.", service)
            }
            Self::CloneFailed { url, .. } => format!(
                "Could not clone {}. Reset the session to try another paper.",
                url
            ),
            Self::Core(err @ CoreError::InvalidTransition { state, .. }) if state == "ERROR" => {
                format!("{}. Reset the session first.", err)
            }
            Self::Core(err) => err.to_string(),
            Self::Store(_) | Self::Io(_) => {
                "A local storage error occurred. Please try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(AgentError::from_status("Gemini", 401, ""), AgentError::Auth { .. }));
        assert!(matches!(AgentError::from_status("Gemini", 403, ""), AgentError::Auth { .. }));
        assert!(matches!(AgentError::from_status("Gemini", 429, ""), AgentError::Quota { .. }));
        assert!(matches!(
            AgentError::from_status("Vectara", 503, ""),
            AgentError::Unavailable { .. }
        ));
        assert!(matches!(
            AgentError::from_status("Vectara", 400, "bad"),
            AgentError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(AgentError::Auth { service: "Vectara" }.is_fatal());
        assert!(AgentError::CloneFailed {
            url: "https://github.com/a/b".into(),
            detail: "exit 128".into()
        }
        .is_fatal());
        assert!(!AgentError::Quota { service: "Gemini" }.is_fatal());
        assert!(!AgentError::NotFound("no paper".into()).is_fatal());
    }

    #[test]
    fn test_error_state_asks_for_reset() {
        let err = AgentError::from(CoreError::InvalidTransition {
            operation: "search",
            state: "ERROR".into(),
        });
        assert!(err.user_message().ends_with("Reset the session first."));
    }

    #[test]
    fn test_user_message_hides_provider_detail() {
        let err = AgentError::Unavailable {
            service: "Vectara",
            detail: "upstream connect error: secret-host:443".into(),
        };
        assert!(!err.user_message().contains("secret-host"));

        let err = AgentError::MalformedResponse {
            service: "Gemini",
            detail: "{\"raw\": true}".into(),
        };
        assert!(!err.user_message().contains("raw"));
    }
}
