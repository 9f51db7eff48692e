pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server returned authentication challenge (status {0})")]
    Unauthorized(u16),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("session closed")]
    Closed,

    #[error("authorization flow failed: {0}")]
    AuthFlow(String),

    #[error("authorization failed after retry")]
    AuthExhausted,

    #[error("remote server unreachable: {0}")]
    Unreachable(String),
}

impl TransportError {
    /// 401/403 from the server: yield to the OAuth provider.
    pub fn is_auth_challenge(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }

    /// Worth retrying with backoff (or falling back to the secondary
    /// transport); everything else is fatal for the attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Http(_) | TransportError::Connect(_) | TransportError::Closed
        )
    }
}

/// Map an HTTP status observed while connecting to the disposition the
/// selector acts on. `None` means the status is acceptable.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> Option<TransportError> {
    match status.as_u16() {
        200..=299 => None,
        // Server exists but dislikes the probe verb or Accept header.
        405 | 406 => None,
        401 | 403 => Some(TransportError::Unauthorized(status.as_u16())),
        404 => Some(TransportError::Connect("endpoint not found".to_string())),
        500..=599 => Some(TransportError::Connect(format!(
            "server error {}",
            status.as_u16()
        ))),
        other => Some(TransportError::Connect(format!("unexpected status {}", other))),
    }
}
