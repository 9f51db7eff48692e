//! stdio-to-remote MCP bridge.
//!
//! Presents a stdio MCP endpoint to the parent process and forwards
//! framed JSON-RPC to a remote server over HTTP-stream or SSE,
//! obtaining bearer credentials via OAuth 2.0 + PKCE when the server
//! demands them.

use mcp_proxy::{init_logging, parse_args, BridgeRuntime};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    };

    let runtime = match BridgeRuntime::new(args) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    };

    match runtime.run().await {
        Ok(()) => {}
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    }
}
