//! Classified registry failures.

use thiserror::Error;

/// Every failed registry call ends up as exactly one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Credentials rejected. Halts network activity until settings refresh.
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Worth retrying with backoff.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 200));
        match status {
            401 | 403 => ClientError::Unauthorized { status, message },
            404 => ClientError::NotFound(message),
            409 => ClientError::Conflict(message),
            408 | 425 | 429 | 500..=599 => ClientError::Transient(message),
            _ => ClientError::Fatal(message),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ClientError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() || err.is_builder() {
            return ClientError::Fatal(err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return ClientError::Transient(err.to_string());
        }
        ClientError::Fatal(err.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
