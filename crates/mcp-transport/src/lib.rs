//! Remote transports for the MCP bridge and the policy that picks one.
//!
//! Both transports hand back a [`session::RemoteSession`]: a pair of
//! FIFO channels driven by a background task that owns the HTTP
//! specifics. The [`selector::TransportSelector`] implements the
//! strategy state machine (probe, auth handoff, fallback, backoff) on
//! top of them.

pub mod error;
pub mod http;
pub mod selector;
pub mod session;
pub mod sse;

pub use error::{Result, TransportError};
pub use selector::{Backoff, CredentialSource, TransportSelector, TransportStrategy};
pub use session::{RemoteSession, TransportType};

use std::collections::HashMap;
use std::time::Duration;

/// Remote connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters shared by both transports.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub url: String,
    /// Operator-supplied headers, applied verbatim.
    pub headers: HashMap<String, String>,
    /// Bearer token injected as `Authorization` unless the operator
    /// already supplied that header.
    pub bearer: Option<String>,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            bearer: None,
        }
    }
}
