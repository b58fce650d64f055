//! Transport error taxonomy shared by every caller of the simulation API.

use serde::Deserialize;
use thiserror::Error;

/// Error body the service sends alongside non-2xx responses,
/// e.g. `{"error": "Invalid JSON", "message": "..."}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct RemoteErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Extract a user-facing message from an error response body.
/// Prefers `message`, then `error`, then `detail`; falls back to the raw body.
pub fn remote_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<RemoteErrorBody>(body) {
        let candidate = [parsed.message, parsed.error, parsed.detail]
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty());
        if candidate.is_some() {
            return candidate;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network failure or timeout. Always transient.
    #[error("service unreachable: {0}")]
    Unreachable(String),
    /// The service answered with a non-2xx status.
    #[error("request rejected with HTTP {status}{}", message_suffix(.message))]
    RemoteRejected { status: u16, message: Option<String> },
    /// The payload did not match the expected shape.
    #[error("malformed payload: {0}")]
    DecodeFailed(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }

    /// Short description suitable for an operator notification.
    pub fn summary(&self) -> String {
        match self {
            TransportError::Unreachable(_) => "server unreachable".to_string(),
            TransportError::RemoteRejected {
                message: Some(message),
                ..
            } => message.clone(),
            TransportError::RemoteRejected {
                status,
                message: None,
            } => format!("rejected (HTTP {status})"),
            TransportError::DecodeFailed(_) => "unexpected response from server".to_string(),
        }
    }
}
