use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scope requested when neither the operator nor the server negotiated one.
pub const DEFAULT_SCOPE: &str = "openid email profile";

/// OAuth 2.0 token endpoint response (RFC 6749 §5.1). `expires_in` is
/// relative; it is normalized to an absolute instant at persistence time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error body returned by OAuth endpoints (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Authorization server metadata (RFC 8414). Servers return a superset;
/// absent optional fields are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    #[serde(flatten)]
    pub additional_metadata: HashMap<String, serde_json::Value>,
}

/// Dynamic client registration response (RFC 7591). The scope shape
/// varies wildly between servers: string, array, `default_`-prefixed,
/// or absent entirely. [`extract_scope`](crate::provider::extract_scope)
/// resolves the priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub default_scope: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub default_scopes: Option<Vec<String>>,

    #[serde(flatten)]
    pub additional_metadata: HashMap<String, serde_json::Value>,
}

/// PKCE parameters (RFC 7636).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// What the authorization redirect delivered to the callback listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code {
        code: String,
        state: Option<String>,
    },
    Denied {
        error: String,
        description: Option<String>,
    },
}

/// Credential invalidation lattice: `All` ⊇ `Client` ⊇ `Tokens`.
/// `Client` wipes the registration, tokens and negotiated scopes but
/// keeps the PKCE verifier (a flow may still be in flight); `All` also
/// wipes the verifier and releases any held auth lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Tokens,
    Client,
    All,
}
