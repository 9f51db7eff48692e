pub type Result<T> = std::result::Result<T, OAuthError>;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("credential store error: {0}")]
    Store(#[from] mcp_store::StoreError),

    #[error("refusing to open unsafe URL: {0}")]
    UnsafeUrl(String),

    #[error("dynamic client registration failed: {0}")]
    Registration(String),

    #[error("authorization server rejected the registered client")]
    InvalidClient,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("authorization server rejected the grant")]
    InvalidGrant,

    #[error("authorization denied: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("callback server error: {0}")]
    CallbackServer(String),

    #[error("state parameter mismatch in authorization callback")]
    StateMismatch,

    #[error("timed out waiting for the user to complete authorization")]
    AuthTimeout,

    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
