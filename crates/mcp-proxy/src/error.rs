use mcp_transport::TransportError;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] mcp_oauth::OAuthError),

    #[error("credential store error: {0}")]
    Store(#[from] mcp_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Process exit code: 1 for configuration errors, 2 when
    /// authorization failed permanently, 3 when the remote stayed
    /// unreachable. Normal shutdown (including SIGINT) exits 0 and
    /// never goes through here.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) => 1,
            BridgeError::Auth(_) | BridgeError::OAuth(_) => 2,
            BridgeError::Transport(t) => match t {
                TransportError::Unauthorized(_)
                | TransportError::AuthFlow(_)
                | TransportError::AuthExhausted => 2,
                TransportError::Unreachable(_) => 3,
                _ => 1,
            },
            BridgeError::Store(_) | BridgeError::Io(_) | BridgeError::Json(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(BridgeError::Config("x".into()).exit_code(), 1);
        assert_eq!(BridgeError::Auth("x".into()).exit_code(), 2);
        assert_eq!(
            BridgeError::Transport(TransportError::AuthExhausted).exit_code(),
            2
        );
        assert_eq!(
            BridgeError::Transport(TransportError::Unreachable("x".into())).exit_code(),
            3
        );
        assert_eq!(
            BridgeError::Transport(TransportError::InvalidUrl("x".into())).exit_code(),
            1
        );
    }
}
