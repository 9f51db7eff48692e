use crate::args::BridgeArgs;
use crate::error::Result;
use async_trait::async_trait;
use mcp_oauth::{InvalidationScope, OAuthProvider, OAuthProviderOptions};
use mcp_store::ConfigStore;
use mcp_transport::{
    CredentialSource, RemoteSession, TransportConfig, TransportError, TransportSelector,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Bridges the selector to the OAuth stack: non-interactive token reads
/// for connection attempts, the full coordinated flow on an auth
/// challenge.
pub struct ProviderCredentials(pub Arc<OAuthProvider>);

#[async_trait]
impl CredentialSource for ProviderCredentials {
    async fn bearer(&self) -> mcp_transport::Result<Option<String>> {
        let tokens = self
            .0
            .load_tokens()
            .map_err(|e| TransportError::AuthFlow(e.to_string()))?;
        Ok(tokens
            .filter(|t| !t.expires_within(60))
            .map(|t| t.access_token))
    }

    async fn authorize(&self) -> mcp_transport::Result<String> {
        self.0
            .ensure_valid_token()
            .await
            .map_err(|e| TransportError::AuthFlow(e.to_string()))
    }
}

/// Provider options derived from the CLI surface.
pub fn provider_options(args: &BridgeArgs) -> OAuthProviderOptions {
    let mut options = OAuthProviderOptions::new(args.server_url.as_str());
    options.callback_host = args.host.clone();
    if let Some(port) = args.callback_port {
        options.callback_port = port;
    }
    options.scopes = args.oauth_scopes.clone();
    options.static_client_metadata = args.static_client_metadata.clone();
    options.static_client_info = args.static_client_info.clone();
    options.authorize_resource = args.authorize_resource.clone();
    options
}

/// Transport configuration derived from the CLI surface.
pub fn transport_config(args: &BridgeArgs) -> TransportConfig {
    let mut config = TransportConfig::new(args.server_url.as_str());
    config.headers = args.headers.clone();
    config
}

/// The bridge proper: store startup and pruning, remote session
/// acquisition through the selector, and the bidirectional stdio pump.
pub struct BridgeRuntime {
    args: BridgeArgs,
    provider: Arc<OAuthProvider>,
    selector: TransportSelector,
}

impl BridgeRuntime {
    pub fn new(args: BridgeArgs) -> Result<Self> {
        let store = ConfigStore::open()?;
        store.prune(std::slice::from_ref(&args.server_url))?;

        let provider = Arc::new(OAuthProvider::new(store, provider_options(&args))?);
        let selector = TransportSelector::new(
            transport_config(&args),
            args.transport_strategy,
            Some(Arc::new(ProviderCredentials(Arc::clone(&provider)))),
        );

        Ok(Self {
            args,
            provider,
            selector,
        })
    }

    /// Run until the upstream closes, a signal arrives, or a fatal
    /// error surfaces. Signals release any held auth lock before the
    /// clean exit.
    pub async fn run(self) -> Result<()> {
        let provider = Arc::clone(&self.provider);

        tokio::select! {
            result = self.pump() => result,
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
                provider.coordinator().release_if_held()?;
                Ok(())
            }
        }
    }

    async fn pump(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        // The upstream client initializes exactly once; on reconnect the
        // bridge replays that handshake itself and swallows the reply.
        let mut init_request: Option<Value> = None;
        let mut init_notification: Option<Value> = None;
        let mut swallow_response_id: Option<Value> = None;

        let mut auth_retried = false;
        let mut first_connect = true;

        'reconnect: loop {
            let mut session: RemoteSession = loop {
                match self.selector.connect().await {
                    Ok(session) => break session,
                    Err(e) if is_auth_failure(&e) && !auth_retried => {
                        warn!(
                            "Authorization failure ({}), invalidating tokens and retrying once",
                            e
                        );
                        auth_retried = true;
                        self.provider
                            .invalidate_credentials(InvalidationScope::Tokens)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            if !first_connect {
                if let Some(init) = &init_request {
                    debug!("Replaying MCP handshake after reconnect");
                    session.send(init.clone())?;
                    swallow_response_id = init.get("id").cloned();
                    if let Some(notification) = &init_notification {
                        session.send(notification.clone())?;
                    }
                }
            }
            first_connect = false;

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line? {
                            None => {
                                info!("Upstream closed stdin, shutting down");
                                session.close().await;
                                self.provider.coordinator().release_if_held()?;
                                return Ok(());
                            }
                            Some(line) => {
                                let trimmed = line.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                let message: Value = match serde_json::from_str(trimmed) {
                                    Ok(message) => message,
                                    Err(e) => {
                                        warn!("Discarding unparseable stdin line: {}", e);
                                        continue;
                                    }
                                };
                                remember_handshake(
                                    &message,
                                    &mut init_request,
                                    &mut init_notification,
                                );
                                if session.send(message).is_err() {
                                    warn!("Remote session closed while sending, reconnecting");
                                    session.close().await;
                                    continue 'reconnect;
                                }
                            }
                        }
                    }
                    message = session.receive() => {
                        match message {
                            Some(mut message) => {
                                if let Some(id) = &swallow_response_id {
                                    if message.get("id") == Some(id)
                                        && message.get("method").is_none()
                                    {
                                        debug!("Swallowing response to replayed initialize");
                                        swallow_response_id = None;
                                        continue;
                                    }
                                }
                                filter_ignored_tools(&mut message, &self.args.ignored_tools);
                                let line = serde_json::to_string(&message)?;
                                stdout.write_all(line.as_bytes()).await?;
                                stdout.write_all(b"\n").await?;
                                stdout.flush().await?;
                            }
                            None => {
                                warn!("Remote session ended, reconnecting");
                                session.close().await;
                                continue 'reconnect;
                            }
                        }
                    }
                }
            }
        }
    }
}

fn is_auth_failure(e: &TransportError) -> bool {
    matches!(
        e,
        TransportError::Unauthorized(_)
            | TransportError::AuthFlow(_)
            | TransportError::AuthExhausted
    )
}

/// Track the upstream handshake messages so they can be replayed on
/// reconnect.
fn remember_handshake(
    message: &Value,
    init_request: &mut Option<Value>,
    init_notification: &mut Option<Value>,
) {
    match message.get("method").and_then(Value::as_str) {
        Some("initialize") if init_request.is_none() => {
            *init_request = Some(message.clone());
        }
        Some("notifications/initialized") if init_notification.is_none() => {
            *init_notification = Some(message.clone());
        }
        _ => {}
    }
}

/// Drop ignored tools from a `tools/list` result passing upstream.
/// This is the only message the bridge peeks into; everything else is
/// forwarded unchanged.
fn filter_ignored_tools(message: &mut Value, ignored: &[String]) {
    if ignored.is_empty() {
        return;
    }

    let Some(tools) = message
        .get_mut("result")
        .and_then(|result| result.get_mut("tools"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    tools.retain(|tool| {
        tool.get("name")
            .and_then(Value::as_str)
            .map_or(true, |name| !ignored.iter().any(|i| i == name))
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_ignored_tools() {
        let mut message = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [
                    {"name": "keep_me", "description": "a"},
                    {"name": "drop_me", "description": "b"},
                ]
            }
        });

        filter_ignored_tools(&mut message, &["drop_me".to_string()]);

        let tools = message["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "keep_me");
    }

    #[test]
    fn test_filter_leaves_other_messages_alone() {
        let original = json!({"jsonrpc": "2.0", "id": 2, "result": {"content": []}});
        let mut message = original.clone();
        filter_ignored_tools(&mut message, &["x".to_string()]);
        assert_eq!(message, original);

        // Empty ignore list means no peeking at all.
        let mut listing = json!({"result": {"tools": [{"name": "x"}]}});
        filter_ignored_tools(&mut listing, &[]);
        assert_eq!(listing["result"]["tools"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_remember_handshake_keeps_first_initialize() {
        let mut init = None;
        let mut initialized = None;

        let first = json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}});
        let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let other = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});

        remember_handshake(&first, &mut init, &mut initialized);
        remember_handshake(&notification, &mut init, &mut initialized);
        remember_handshake(&other, &mut init, &mut initialized);

        assert_eq!(init.unwrap()["method"], "initialize");
        assert_eq!(initialized.unwrap()["method"], "notifications/initialized");
    }

    #[test]
    fn test_provider_options_mapping() {
        let args = crate::args::parse_args([
            "https://example.com/sse",
            "4123",
            "--host",
            "127.0.0.1",
            "--oauth-scopes",
            "openid",
        ])
        .unwrap();

        let options = provider_options(&args);
        assert_eq!(options.server_url, "https://example.com/sse");
        assert_eq!(options.callback_host, "127.0.0.1");
        assert_eq!(options.callback_port, 4123);
        assert_eq!(options.scopes.as_deref(), Some("openid"));
    }
}
