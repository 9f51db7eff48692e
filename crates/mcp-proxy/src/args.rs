use crate::error::{BridgeError, Result};
use clap::Parser;
use mcp_store::ClientCredentials;
use mcp_transport::TransportStrategy;
use std::collections::HashMap;
use std::ffi::OsString;
use tracing::debug;
use url::Url;

/// Raw CLI grammar, shared by the proxy and the test client.
#[derive(Parser, Debug)]
#[command(name = "mcp-remote")]
#[command(about = "Bridge a stdio MCP client to a remote HTTP/SSE MCP server")]
#[command(version)]
struct Cli {
    /// Remote MCP server URL
    server_url: String,

    /// OAuth callback port (used only when numeric)
    callback_port: Option<String>,

    /// Extra HTTP header, "Name: value" (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Transport strategy: sse-only, http-only, sse-first, http-first
    #[arg(long)]
    transport: Option<String>,

    /// Host used in the OAuth redirect URI
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Allow http:// URLs for non-loopback hosts
    #[arg(long)]
    allow_http: bool,

    /// Tool name to drop from tools/list results (repeatable)
    #[arg(long = "ignore-tool")]
    ignore_tool: Vec<String>,

    /// JSON merged over the dynamic-registration payload
    #[arg(long)]
    static_oauth_client_metadata: Option<String>,

    /// JSON of a pre-registered OAuth client
    #[arg(long)]
    static_oauth_client_info: Option<String>,

    /// Space-separated OAuth scopes to request
    #[arg(long)]
    oauth_scopes: Option<String>,

    /// RFC 8707 resource indicator for authorization requests
    #[arg(long)]
    authorize_resource: Option<String>,
}

/// Parsed and validated bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeArgs {
    pub server_url: String,
    /// `None` means pick a port automatically.
    pub callback_port: Option<u16>,
    pub host: String,
    pub transport_strategy: TransportStrategy,
    pub headers: HashMap<String, String>,
    pub ignored_tools: Vec<String>,
    pub allow_http: bool,
    pub static_client_metadata: Option<serde_json::Value>,
    pub static_client_info: Option<ClientCredentials>,
    pub oauth_scopes: Option<String>,
    pub authorize_resource: Option<String>,
}

/// Parse an argument vector (without the program name). Pure: the same
/// input always yields the same output, and nothing is touched beyond
/// the vector itself.
pub fn parse_args<I, T>(args: I) -> Result<BridgeArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let argv = std::iter::once(OsString::from("mcp-remote"))
        .chain(args.into_iter().map(Into::into));
    let cli = Cli::try_parse_from(argv).map_err(|e| BridgeError::Config(e.to_string()))?;

    validate_server_url(&cli.server_url, cli.allow_http)?;

    // Second positional is the callback port only when it is numeric.
    let callback_port = cli
        .callback_port
        .as_deref()
        .and_then(|raw| raw.parse::<u16>().ok());

    // Unknown strategies fall back to the default silently.
    let transport_strategy = cli
        .transport
        .as_deref()
        .map(TransportStrategy::parse_or_default)
        .unwrap_or_default();

    // "Name: value" with the value kept verbatim after the first colon;
    // entries without a colon are discarded.
    let mut headers = HashMap::new();
    for header in &cli.headers {
        match header.split_once(':') {
            Some((name, value)) if !name.is_empty() => {
                headers.insert(name.to_string(), value.to_string());
            }
            _ => debug!("Discarding malformed header argument: {:?}", header),
        }
    }

    let static_client_metadata = cli
        .static_oauth_client_metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| BridgeError::Config(format!("invalid --static-oauth-client-metadata: {}", e)))?;

    let static_client_info = cli
        .static_oauth_client_info
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| BridgeError::Config(format!("invalid --static-oauth-client-info: {}", e)))?;

    Ok(BridgeArgs {
        server_url: cli.server_url,
        callback_port,
        host: cli.host,
        transport_strategy,
        headers,
        ignored_tools: cli.ignore_tool,
        allow_http: cli.allow_http,
        static_client_metadata,
        static_client_info,
        oauth_scopes: cli.oauth_scopes,
        authorize_resource: cli.authorize_resource,
    })
}

/// `http://` is only acceptable toward loopback unless the operator
/// opted in; anything other than http/https is rejected outright.
fn validate_server_url(raw: &str, allow_http: bool) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| BridgeError::Config(format!("invalid URL '{}': {}", raw, e)))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            let host = url.host_str().unwrap_or_default();
            if host == "localhost" || host == "127.0.0.1" || allow_http {
                Ok(())
            } else {
                Err(BridgeError::Config(format!(
                    "http:// is only allowed for loopback hosts; pass --allow-http to \
                     connect to '{}' anyway",
                    host
                )))
            }
        }
        other => Err(BridgeError::Config(format!(
            "unsupported URL scheme '{}'",
            other
        ))),
    }
}
