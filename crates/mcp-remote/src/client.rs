//! Smoke-test client: connects to the same remote a bridge would,
//! performs the MCP initialize handshake, lists the server's tools and
//! exits. Useful for verifying connectivity and the OAuth flow without
//! wiring up a real MCP client.

use mcp_oauth::OAuthProvider;
use mcp_proxy::bridge::{provider_options, transport_config, ProviderCredentials};
use mcp_proxy::{init_logging, parse_args};
use mcp_store::ConfigStore;
use mcp_transport::{RemoteSession, TransportSelector};
use serde_json::{json, Value};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("{}", e);
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1)).map_err(|e| anyhow::anyhow!("{}", e))?;

    let store = ConfigStore::open()?;
    let provider = Arc::new(OAuthProvider::new(store, provider_options(&args))?);
    let mut selector = TransportSelector::new(
        transport_config(&args),
        args.transport_strategy,
        Some(Arc::new(ProviderCredentials(Arc::clone(&provider)))),
    );

    let mut session = selector.connect().await?;
    info!("Connected via {}", session.transport_type());

    let init_result = request(
        &mut session,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "mcp-remote-client",
                "version": env!("CARGO_PKG_VERSION"),
            },
        }),
    )
    .await?;

    let server_info = &init_result["serverInfo"];
    println!(
        "Connected to {} v{}",
        server_info["name"].as_str().unwrap_or("unknown"),
        server_info["version"].as_str().unwrap_or("unknown"),
    );

    session.send(json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    }))?;

    let tools_result = request(&mut session, "tools/list", Value::Null).await?;
    let tools = tools_result["tools"].as_array().cloned().unwrap_or_default();

    println!("Server provides {} tool(s):", tools.len());
    for tool in &tools {
        let name = tool["name"].as_str().unwrap_or("?");
        if args.ignored_tools.iter().any(|i| i == name) {
            continue;
        }
        println!(
            "  {} - {}",
            name,
            tool["description"].as_str().unwrap_or("")
        );
    }

    session.close().await;
    Ok(())
}

/// Send a request and wait for its response, forwarding nothing:
/// unrelated server messages are discarded, this is a diagnostic tool.
async fn request(
    session: &mut RemoteSession,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let id = Uuid::new_v4().to_string();
    let mut message = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
    });
    if !params.is_null() {
        message["params"] = params;
    }

    session.send(message)?;

    let response = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(message) = session.receive().await {
            if message.get("id").and_then(Value::as_str) == Some(id.as_str()) {
                return Some(message);
            }
        }
        None
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for {} response", method))?
    .ok_or_else(|| anyhow::anyhow!("session closed before {} response", method))?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("{} failed: {}", method, error);
    }

    Ok(response["result"].clone())
}
