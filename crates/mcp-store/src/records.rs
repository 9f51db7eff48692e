use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record filenames within a server directory.
pub const CLIENT_INFO_FILE: &str = "client_info.json";
pub const TOKENS_FILE: &str = "tokens.json";
pub const CODE_VERIFIER_FILE: &str = "code_verifier.txt";
pub const SCOPES_FILE: &str = "scopes.json";
pub const LOCK_FILE: &str = "lock.json";
pub const SERVER_FILE: &str = "server.json";

/// Persisted dynamic-registration result. Servers return a superset of
/// this; unknown fields are dropped on read and absent ones tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// Persisted token set. `expires_at` is always an absolute instant;
/// relative `expires_in` values are normalized before this record is
/// written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredTokens {
    /// Whether the access token is expired or expires within `buffer_secs`.
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, buffer_secs: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + chrono::Duration::seconds(buffer_secs as i64),
            None => false,
        }
    }
}

/// The process currently driving the interactive auth flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub port: u16,
    /// Unix seconds at acquisition; locks older than the staleness
    /// window are reclaimable regardless of PID.
    pub timestamp: u64,
}

/// The URL behind a server hash, kept so stale directories can be
/// pruned when the URL for a hash changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expires_within() {
        let tokens = StoredTokens {
            access_token: "at".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::seconds(30)),
            scope: None,
        };

        assert!(tokens.expires_within(60));
        assert!(!tokens.expires_within(10));

        let no_expiry = StoredTokens {
            expires_at: None,
            ..tokens
        };
        assert!(!no_expiry.expires_within(3600));
    }

    #[test]
    fn test_client_credentials_tolerates_partial_response() {
        let parsed: ClientCredentials =
            serde_json::from_str(r#"{"client_id":"x","extra_field":42}"#).unwrap();
        assert_eq!(parsed.client_id, "x");
        assert!(parsed.client_secret.is_none());
        assert!(parsed.scopes.is_none());
    }
}
