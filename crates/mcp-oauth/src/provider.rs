use crate::browser::BrowserLauncher;
use crate::callback::CallbackServer;
use crate::coordination::{AuthCoordinator, Coordination};
use crate::error::{OAuthError, Result};
use crate::pkce::generate_pkce_challenge;
use crate::sanitize::sanitize_url;
use crate::types::{
    CallbackOutcome, InvalidationScope, OAuthErrorBody, RegistrationResponse, ServerMetadata,
    TokenResponse, DEFAULT_SCOPE,
};
use chrono::Utc;
use mcp_store::records::{
    CLIENT_INFO_FILE, CODE_VERIFIER_FILE, SCOPES_FILE, TOKENS_FILE,
};
use mcp_store::{server_hash, ClientCredentials, ConfigStore, StoredTokens};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Tokens expiring within this many seconds are refreshed eagerly.
const TOKEN_EXPIRY_BUFFER_SECS: u64 = 60;

/// Token endpoint and discovery requests share this timeout.
const TOKEN_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Operator-facing knobs for a provider instance.
#[derive(Debug, Clone)]
pub struct OAuthProviderOptions {
    pub server_url: String,
    /// Host used in the redirect URI handed to the authorization server.
    pub callback_host: String,
    /// Preferred callback port; the coordinator scans upward from here.
    pub callback_port: u16,
    /// Explicit scope request; takes priority over negotiated scopes.
    pub scopes: Option<String>,
    /// Deep-merged over the default registration payload.
    pub static_client_metadata: Option<serde_json::Value>,
    /// Pre-registered client for servers without dynamic registration.
    pub static_client_info: Option<ClientCredentials>,
    /// RFC 8707 resource indicator attached to authorization requests.
    pub authorize_resource: Option<String>,
}

impl OAuthProviderOptions {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            callback_host: "localhost".to_string(),
            callback_port: 3334,
            scopes: None,
            static_client_metadata: None,
            static_client_info: None,
            authorize_resource: None,
        }
    }
}

/// Drives the OAuth 2.0 authorization-code + PKCE flow for one remote
/// server, persisting registration, tokens, scopes and the code
/// verifier through the config store and deferring cross-process
/// single-flight to the [`AuthCoordinator`].
pub struct OAuthProvider {
    store: ConfigStore,
    server_hash: String,
    coordinator: AuthCoordinator,
    options: OAuthProviderOptions,
    http: reqwest::Client,
    /// Scope negotiated by the last registration, cached so the next
    /// authorization request uses it without a store round trip.
    negotiated_scope: Mutex<Option<String>>,
}

impl OAuthProvider {
    pub fn new(store: ConfigStore, options: OAuthProviderOptions) -> Result<Self> {
        let hash = server_hash(&options.server_url);
        let coordinator = AuthCoordinator::new(store.clone(), hash.clone());
        let http = reqwest::Client::builder()
            .timeout(TOKEN_HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            store,
            server_hash: hash,
            coordinator,
            options,
            http,
            negotiated_scope: Mutex::new(None),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.options.server_url
    }

    pub fn coordinator(&self) -> &AuthCoordinator {
        &self.coordinator
    }

    /// The scope attached to registration and authorization requests:
    /// operator-supplied, else negotiated, else the default.
    pub fn current_scope(&self) -> String {
        if let Some(scopes) = &self.options.scopes {
            return scopes.clone();
        }
        if let Some(cached) = self.negotiated_scope.lock().unwrap().clone() {
            return cached;
        }
        if let Ok(Some(stored)) = self.store.read_json::<String>(&self.server_hash, SCOPES_FILE) {
            *self.negotiated_scope.lock().unwrap() = Some(stored.clone());
            return stored;
        }
        DEFAULT_SCOPE.to_string()
    }

    /// Dynamic-registration payload for `redirect_uri`. Operator
    /// `static_client_metadata` is deep-merged over the defaults; if it
    /// overrides `redirect_uris`, the override goes to the server but
    /// the listener still binds the coordinator's port.
    pub fn client_metadata(&self, redirect_uri: &str) -> serde_json::Value {
        let mut metadata = serde_json::json!({
            "client_name": "mcp-remote",
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
            "scope": self.current_scope(),
            "software_id": "mcp-remote",
            "software_version": env!("CARGO_PKG_VERSION"),
        });

        if let Some(overrides) = &self.options.static_client_metadata {
            deep_merge(&mut metadata, overrides);
            if overrides.get("redirect_uris").is_some()
                && metadata["redirect_uris"] != serde_json::json!([redirect_uri])
            {
                warn!(
                    "static client metadata overrides redirect_uris; the callback \
                     listener still binds {} regardless",
                    redirect_uri
                );
            }
        }

        metadata
    }

    /// Discover authorization server metadata (RFC 8414), falling back
    /// to conventional endpoint paths when the server has no discovery
    /// document.
    pub async fn discover_metadata(&self) -> Result<ServerMetadata> {
        let base = Url::parse(&self.options.server_url)?;
        let origin = base.origin().ascii_serialization();
        let well_known = format!("{}/.well-known/oauth-authorization-server", origin);

        debug!("Discovering OAuth metadata from {}", well_known);

        match self.http.get(&well_known).send().await {
            Ok(resp) if resp.status().is_success() => Ok(resp.json().await?),
            Ok(resp) => {
                warn!(
                    "Metadata discovery returned {}, using conventional endpoints",
                    resp.status()
                );
                Ok(fallback_metadata(&origin))
            }
            Err(e) => {
                warn!("Metadata discovery failed ({}), using conventional endpoints", e);
                Ok(fallback_metadata(&origin))
            }
        }
    }

    /// Register with the server and persist the result.
    pub async fn register_client(
        &self,
        metadata: &ServerMetadata,
        redirect_uri: &str,
    ) -> Result<ClientCredentials> {
        let endpoint = metadata.registration_endpoint.as_ref().ok_or_else(|| {
            OAuthError::Registration(
                "server does not support dynamic registration; \
                 supply --static-oauth-client-info"
                    .to_string(),
            )
        })?;

        info!("Registering OAuth client at {}", endpoint);

        let payload = self.client_metadata(redirect_uri);
        let resp = self.http.post(endpoint).json(&payload).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if oauth_error_code(&body).as_deref() == Some("invalid_client") {
                return Err(OAuthError::InvalidClient);
            }
            return Err(OAuthError::Registration(format!(
                "registration failed with status {}: {}",
                status, body
            )));
        }

        let registration: RegistrationResponse = resp.json().await?;
        info!("Registered client {}", registration.client_id);

        self.save_client_information(&registration)?;

        Ok(ClientCredentials {
            client_id: registration.client_id,
            client_secret: registration.client_secret,
            redirect_uris: registration.redirect_uris,
            scope: registration.scope,
            scopes: registration.scopes,
        })
    }

    /// Persist a registration response and the scope extracted from it.
    /// The scope lives in its own record so it survives a later rewrite
    /// of the client registration.
    pub fn save_client_information(&self, response: &RegistrationResponse) -> Result<()> {
        let scope = extract_scope(response);
        self.store
            .write_json(&self.server_hash, SCOPES_FILE, &scope)?;
        *self.negotiated_scope.lock().unwrap() = Some(scope);

        let credentials = ClientCredentials {
            client_id: response.client_id.clone(),
            client_secret: response.client_secret.clone(),
            redirect_uris: response.redirect_uris.clone(),
            scope: response.scope.clone(),
            scopes: response.scopes.clone(),
        };
        self.store
            .write_json(&self.server_hash, CLIENT_INFO_FILE, &credentials)?;
        Ok(())
    }

    /// Load the stored registration, warming the scope cache. Returns
    /// `None` when the stored negotiated scope no longer covers an
    /// operator-requested scope, forcing a re-registration rather than
    /// a silent widening.
    pub fn client_information(&self) -> Result<Option<ClientCredentials>> {
        let Some(credentials) = self
            .store
            .read_json::<ClientCredentials>(&self.server_hash, CLIENT_INFO_FILE)?
        else {
            return Ok(None);
        };

        if let Some(negotiated) = self.store.read_json::<String>(&self.server_hash, SCOPES_FILE)? {
            if let Some(requested) = &self.options.scopes {
                let have: std::collections::HashSet<&str> =
                    negotiated.split_whitespace().collect();
                if !requested.split_whitespace().all(|s| have.contains(s)) {
                    info!("Stored registration lacks requested scopes, re-registering");
                    return Ok(None);
                }
            }
            *self.negotiated_scope.lock().unwrap() = Some(negotiated);
        }

        Ok(Some(credentials))
    }

    /// Persist tokens, normalizing the relative `expires_in` to an
    /// absolute instant.
    pub fn save_tokens(&self, response: &TokenResponse) -> Result<StoredTokens> {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));

        let stored = StoredTokens {
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at,
            scope: response.scope.clone(),
        };

        self.store
            .write_json(&self.server_hash, TOKENS_FILE, &stored)?;
        Ok(stored)
    }

    pub fn load_tokens(&self) -> Result<Option<StoredTokens>> {
        Ok(self.store.read_json(&self.server_hash, TOKENS_FILE)?)
    }

    pub fn save_code_verifier(&self, verifier: &str) -> Result<()> {
        Ok(self
            .store
            .write_text(&self.server_hash, CODE_VERIFIER_FILE, verifier)?)
    }

    pub fn load_code_verifier(&self) -> Result<Option<String>> {
        Ok(self.store.read_text(&self.server_hash, CODE_VERIFIER_FILE)?)
    }

    /// Delete records per the invalidation lattice (`All` ⊇ `Client` ⊇
    /// `Tokens`). `Client` keeps the verifier because a flow may still
    /// be in flight; `All` wipes it and releases any held lock.
    pub fn invalidate_credentials(&self, scope: InvalidationScope) -> Result<()> {
        self.store.delete(&self.server_hash, TOKENS_FILE)?;

        if matches!(scope, InvalidationScope::Client | InvalidationScope::All) {
            self.store.delete(&self.server_hash, CLIENT_INFO_FILE)?;
            self.store.delete(&self.server_hash, SCOPES_FILE)?;
            *self.negotiated_scope.lock().unwrap() = None;
        }

        if matches!(scope, InvalidationScope::All) {
            self.store.delete(&self.server_hash, CODE_VERIFIER_FILE)?;
            self.coordinator.release_if_held()?;
        }

        Ok(())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        metadata: &ServerMetadata,
        credentials: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("client_id", &credentials.client_id);
        form.insert("code", code);
        form.insert("redirect_uri", redirect_uri);
        form.insert("code_verifier", code_verifier);
        if let Some(secret) = &credentials.client_secret {
            form.insert("client_secret", secret);
        }

        let resp = self
            .http
            .post(&metadata.token_endpoint)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(match oauth_error_code(&body).as_deref() {
                Some("invalid_client") => OAuthError::InvalidClient,
                Some("invalid_grant") => OAuthError::InvalidGrant,
                _ => OAuthError::TokenExchange(format!(
                    "token endpoint returned {}: {}",
                    status, body
                )),
            });
        }

        Ok(resp.json().await?)
    }

    /// Refresh the access token, persisting the result. The original
    /// refresh token is kept when the server does not rotate it.
    pub async fn refresh_tokens(
        &self,
        metadata: &ServerMetadata,
        credentials: &ClientCredentials,
        current: &StoredTokens,
    ) -> Result<StoredTokens> {
        let refresh_token = current
            .refresh_token
            .as_ref()
            .ok_or_else(|| OAuthError::TokenRefresh("no refresh token available".to_string()))?;

        debug!("Refreshing access token");

        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("client_id", &credentials.client_id);
        form.insert("refresh_token", refresh_token);
        if let Some(secret) = &credentials.client_secret {
            form.insert("client_secret", secret);
        }
        if let Some(scope) = &current.scope {
            form.insert("scope", scope);
        }

        let resp = self
            .http
            .post(&metadata.token_endpoint)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(match oauth_error_code(&body).as_deref() {
                Some("invalid_grant") => OAuthError::InvalidGrant,
                Some("invalid_client") => OAuthError::InvalidClient,
                _ => OAuthError::TokenRefresh(format!(
                    "token endpoint returned {}: {}",
                    status, body
                )),
            });
        }

        let mut response: TokenResponse = resp.json().await?;
        if response.refresh_token.is_none() {
            response.refresh_token = current.refresh_token.clone();
        }

        self.save_tokens(&response)
    }

    /// Sanitize the authorization endpoint, attach the flow parameters
    /// (each encoded exactly once, after sanitization) and open the
    /// system browser.
    pub fn redirect_to_authorization(
        &self,
        metadata: &ServerMetadata,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<()> {
        let safe_endpoint = sanitize_url(&metadata.authorization_endpoint)?;
        let mut auth_url = Url::parse(&safe_endpoint)?;

        {
            let mut query = auth_url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", client_id);
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("state", state);
            query.append_pair("code_challenge", code_challenge);
            query.append_pair("code_challenge_method", "S256");
            query.append_pair("scope", &self.current_scope());
            if let Some(resource) = &self.options.authorize_resource {
                query.append_pair("resource", resource);
            }
        }

        BrowserLauncher::launch(auth_url.as_str())
    }

    /// Produce a valid access token: cached, refreshed, or via a full
    /// coordinated authorization-code flow.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        self.store
            .record_server_url(&self.server_hash, &self.options.server_url)?;

        if let Some(tokens) = self.load_tokens()? {
            if !tokens.expires_within(TOKEN_EXPIRY_BUFFER_SECS) {
                debug!("Using stored access token");
                return Ok(tokens.access_token);
            }

            if tokens.refresh_token.is_some() {
                let metadata = self.discover_metadata().await?;
                match self.resolve_client(&metadata, None).await {
                    Ok(credentials) => {
                        match self.refresh_tokens(&metadata, &credentials, &tokens).await {
                            Ok(refreshed) => return Ok(refreshed.access_token),
                            Err(OAuthError::InvalidGrant) => {
                                info!("Refresh token rejected, starting a fresh flow");
                                self.invalidate_credentials(InvalidationScope::Tokens)?;
                            }
                            Err(OAuthError::InvalidClient) => {
                                info!("Client registration rejected, re-registering");
                                self.invalidate_credentials(InvalidationScope::Client)?;
                            }
                            Err(e) => {
                                warn!("Token refresh failed ({}), starting a fresh flow", e);
                            }
                        }
                    }
                    Err(e) => debug!("No client available for refresh: {}", e),
                }
            }
        }

        self.authorize().await
    }

    /// The coordinated interactive flow: elect a role, lead or follow,
    /// and retry once through a fresh registration when the server
    /// rejects the stored client.
    async fn authorize(&self) -> Result<String> {
        let metadata = self.discover_metadata().await?;

        let mut client_retried = false;
        let mut elections = 0;

        loop {
            elections += 1;
            if elections > 3 {
                return Err(OAuthError::AuthTimeout);
            }

            match self.coordinator.coordinate(self.options.callback_port)? {
                Coordination::Follower { port } => {
                    if let Some(tokens) = self.coordinator.wait_for_leader(port).await? {
                        info!("Authorization completed by another process");
                        return Ok(tokens.access_token);
                    }
                    // Leader vanished without writing tokens; re-elect.
                    continue;
                }
                Coordination::Leader { port, guard } => {
                    let result = self.lead_authorization(&metadata, port).await;
                    guard.release();

                    match result {
                        Err(OAuthError::InvalidClient) if !client_retried => {
                            info!("Stored client rejected during exchange, re-registering once");
                            client_retried = true;
                            self.invalidate_credentials(InvalidationScope::Client)?;
                            continue;
                        }
                        other => return other,
                    }
                }
            }
        }
    }

    /// Leader path: bind the listener, open the browser, await the
    /// redirect, exchange the code, persist tokens, and only then let
    /// followers observe completion.
    async fn lead_authorization(&self, metadata: &ServerMetadata, port: u16) -> Result<String> {
        let state = Uuid::new_v4().to_string();
        let listener = CallbackServer::bind(port, Some(state.clone()))?;
        let redirect_uri = listener.redirect_uri(&self.options.callback_host);

        let credentials = self.resolve_client(metadata, Some(&redirect_uri)).await?;

        let pkce = generate_pkce_challenge();
        self.save_code_verifier(&pkce.code_verifier)?;

        self.redirect_to_authorization(
            metadata,
            &credentials.client_id,
            &redirect_uri,
            &state,
            &pkce.code_challenge,
        )?;

        let code = match listener.wait_for_code().await? {
            CallbackOutcome::Code { code, state: got } => {
                if got.as_deref() != Some(state.as_str()) {
                    return Err(OAuthError::StateMismatch);
                }
                code
            }
            CallbackOutcome::Denied { error, description } => {
                return Err(OAuthError::AuthorizationDenied { error, description });
            }
        };

        let verifier = self.load_code_verifier()?.ok_or_else(|| {
            OAuthError::InvalidConfiguration("code verifier missing at exchange time".to_string())
        })?;

        let response = self
            .exchange_code(metadata, &credentials, &code, &redirect_uri, &verifier)
            .await?;

        let stored = self.save_tokens(&response)?;
        self.store.delete(&self.server_hash, CODE_VERIFIER_FILE)?;

        // Tokens are on disk; now followers may complete.
        listener.mark_complete();
        listener.shutdown().await;

        info!("Authorization flow completed");
        Ok(stored.access_token)
    }

    /// Resolve client credentials: operator-supplied, then stored, then
    /// dynamic registration (which needs the redirect URI).
    async fn resolve_client(
        &self,
        metadata: &ServerMetadata,
        redirect_uri: Option<&str>,
    ) -> Result<ClientCredentials> {
        if let Some(static_info) = &self.options.static_client_info {
            return Ok(static_info.clone());
        }
        if let Some(stored) = self.client_information()? {
            return Ok(stored);
        }
        match redirect_uri {
            Some(uri) => self.register_client(metadata, uri).await,
            None => Err(OAuthError::InvalidConfiguration(
                "no registered client available".to_string(),
            )),
        }
    }
}

/// Scope extraction priority for registration responses: `scope`,
/// `default_scope`, `scopes[]`, `default_scopes[]`, then the default.
/// Empty strings and empty arrays count as absent.
pub fn extract_scope(response: &RegistrationResponse) -> String {
    if let Some(scope) = non_empty(response.scope.as_deref()) {
        return scope;
    }
    if let Some(scope) = non_empty(response.default_scope.as_deref()) {
        return scope;
    }
    if let Some(scopes) = response.scopes.as_deref().filter(|s| !s.is_empty()) {
        return scopes.join(" ");
    }
    if let Some(scopes) = response.default_scopes.as_deref().filter(|s| !s.is_empty()) {
        return scopes.join(" ");
    }
    DEFAULT_SCOPE.to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Recursively merge `overlay` into `base`; objects merge key-wise,
/// everything else is replaced.
fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                deep_merge(
                    base_map.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

/// Pull the `error` code out of an OAuth error body, if it is one.
fn oauth_error_code(body: &str) -> Option<String> {
    serde_json::from_str::<OAuthErrorBody>(body)
        .ok()
        .map(|b| b.error)
}

fn fallback_metadata(origin: &str) -> ServerMetadata {
    ServerMetadata {
        issuer: origin.to_string(),
        authorization_endpoint: format!("{}/oauth/authorize", origin),
        token_endpoint: format!("{}/oauth/token", origin),
        registration_endpoint: Some(format!("{}/oauth/register", origin)),
        scopes_supported: None,
        code_challenge_methods_supported: Some(vec!["S256".to_string()]),
        additional_metadata: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_store::records::LOCK_FILE;
    use mcp_store::records::LockRecord;
    use tempfile::tempdir;

    fn registration(json: &str) -> RegistrationResponse {
        serde_json::from_str(json).unwrap()
    }

    fn provider_at(root: &std::path::Path) -> OAuthProvider {
        OAuthProvider::new(
            ConfigStore::with_root(root),
            OAuthProviderOptions::new("https://s.example/mcp"),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_scope_priority_order() {
        assert_eq!(
            extract_scope(&registration(r#"{"client_id":"x","scope":"a b"}"#)),
            "a b"
        );
        assert_eq!(
            extract_scope(&registration(r#"{"client_id":"x","default_scope":"c"}"#)),
            "c"
        );
        assert_eq!(
            extract_scope(&registration(
                r#"{"client_id":"x","scopes":["openid","email","profile"]}"#
            )),
            "openid email profile"
        );
        assert_eq!(
            extract_scope(&registration(
                r#"{"client_id":"x","default_scopes":["d","e"]}"#
            )),
            "d e"
        );
        // String beats array when both are present.
        assert_eq!(
            extract_scope(&registration(
                r#"{"client_id":"x","scope":"s","scopes":["t"]}"#
            )),
            "s"
        );
    }

    #[test]
    fn test_extract_scope_falls_back_on_empty_response() {
        assert_eq!(
            extract_scope(&registration(r#"{"client_id":"x"}"#)),
            DEFAULT_SCOPE
        );
        assert_eq!(
            extract_scope(&registration(r#"{"client_id":"x","scope":"","scopes":[]}"#)),
            DEFAULT_SCOPE
        );
    }

    #[test]
    fn test_save_tokens_normalizes_expires_in() {
        let dir = tempdir().unwrap();
        let provider = provider_at(dir.path());

        let before = Utc::now();
        let stored = provider
            .save_tokens(&TokenResponse {
                access_token: "at".into(),
                token_type: "Bearer".into(),
                expires_in: Some(3600),
                refresh_token: Some("rt".into()),
                scope: Some("openid".into()),
            })
            .unwrap();

        let expires_at = stored.expires_at.unwrap();
        let lower = before + chrono::Duration::seconds(3590);
        let upper = Utc::now() + chrono::Duration::seconds(3610);
        assert!(expires_at > lower && expires_at < upper);

        let loaded = provider.load_tokens().unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn test_invalidation_lattice() {
        let dir = tempdir().unwrap();
        let provider = provider_at(dir.path());
        let store = ConfigStore::with_root(dir.path());
        let hash = server_hash("https://s.example/mcp");

        let seed = |provider: &OAuthProvider| {
            provider
                .save_client_information(&registration(
                    r#"{"client_id":"c1","scope":"openid"}"#,
                ))
                .unwrap();
            provider
                .save_tokens(&TokenResponse {
                    access_token: "at".into(),
                    token_type: "Bearer".into(),
                    expires_in: None,
                    refresh_token: None,
                    scope: None,
                })
                .unwrap();
            provider.save_code_verifier("verifier").unwrap();
            store
                .create_exclusive(
                    &hash,
                    LOCK_FILE,
                    &LockRecord {
                        pid: std::process::id(),
                        port: 1,
                        timestamp: 0,
                    },
                )
                .unwrap();
        };

        // tokens: only the token record goes.
        seed(&provider);
        provider
            .invalidate_credentials(InvalidationScope::Tokens)
            .unwrap();
        assert!(provider.load_tokens().unwrap().is_none());
        assert!(provider.client_information().unwrap().is_some());
        assert!(provider.load_code_verifier().unwrap().is_some());

        // client: registration, scopes and tokens go; verifier stays.
        seed(&provider);
        provider
            .invalidate_credentials(InvalidationScope::Client)
            .unwrap();
        assert!(provider.load_tokens().unwrap().is_none());
        assert!(provider.client_information().unwrap().is_none());
        assert!(store
            .read_json::<String>(&hash, SCOPES_FILE)
            .unwrap()
            .is_none());
        assert!(provider.load_code_verifier().unwrap().is_some());

        // all: everything goes, including the verifier and the lock.
        seed(&provider);
        provider
            .invalidate_credentials(InvalidationScope::All)
            .unwrap();
        assert!(provider.load_code_verifier().unwrap().is_none());
        assert!(store
            .read_json::<LockRecord>(&hash, LOCK_FILE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_code_verifier_round_trip() {
        let dir = tempdir().unwrap();
        let provider = provider_at(dir.path());

        assert!(provider.load_code_verifier().unwrap().is_none());
        provider.save_code_verifier("v-123").unwrap();
        assert_eq!(provider.load_code_verifier().unwrap().unwrap(), "v-123");
    }

    #[test]
    fn test_client_metadata_defaults_and_merge() {
        let dir = tempdir().unwrap();
        let mut options = OAuthProviderOptions::new("https://s.example/mcp");
        options.static_client_metadata = Some(serde_json::json!({
            "client_name": "custom",
            "contacts": ["ops@example.com"],
        }));
        let provider = OAuthProvider::new(ConfigStore::with_root(dir.path()), options).unwrap();

        let metadata = provider.client_metadata("http://localhost:3334/oauth/callback");
        assert_eq!(metadata["client_name"], "custom");
        assert_eq!(metadata["contacts"][0], "ops@example.com");
        assert_eq!(metadata["token_endpoint_auth_method"], "none");
        assert_eq!(
            metadata["redirect_uris"][0],
            "http://localhost:3334/oauth/callback"
        );
        assert_eq!(metadata["scope"], DEFAULT_SCOPE);
    }

    #[test]
    fn test_scope_priority_operator_over_negotiated() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());

        let provider = OAuthProvider::new(
            store.clone(),
            OAuthProviderOptions::new("https://s.example/mcp"),
        )
        .unwrap();
        provider
            .save_client_information(&registration(
                r#"{"client_id":"x","scope":"negotiated"}"#,
            ))
            .unwrap();
        assert_eq!(provider.current_scope(), "negotiated");

        let mut options = OAuthProviderOptions::new("https://s.example/mcp");
        options.scopes = Some("explicit scopes".to_string());
        let provider = OAuthProvider::new(store, options).unwrap();
        assert_eq!(provider.current_scope(), "explicit scopes");
    }

    #[test]
    fn test_client_information_refuses_narrower_scope() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());

        let provider = OAuthProvider::new(
            store.clone(),
            OAuthProviderOptions::new("https://s.example/mcp"),
        )
        .unwrap();
        provider
            .save_client_information(&registration(r#"{"client_id":"x","scope":"openid"}"#))
            .unwrap();

        let mut options = OAuthProviderOptions::new("https://s.example/mcp");
        options.scopes = Some("openid admin".to_string());
        let provider = OAuthProvider::new(store, options).unwrap();
        assert!(provider.client_information().unwrap().is_none());
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        deep_merge(&mut base, &serde_json::json!({"a": {"c": 9}, "e": 4}));
        assert_eq!(base, serde_json::json!({"a": {"b": 1, "c": 9}, "d": 3, "e": 4}));
    }

    #[test]
    fn test_oauth_error_code_parsing() {
        assert_eq!(
            oauth_error_code(r#"{"error":"invalid_grant"}"#).as_deref(),
            Some("invalid_grant")
        );
        assert!(oauth_error_code("not json").is_none());
        assert!(oauth_error_code(r#"{"message":"boom"}"#).is_none());
    }
}
