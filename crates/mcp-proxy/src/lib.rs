//! Bridge runtime: wires the upstream stdio transport to a remote
//! HTTP/SSE session, with the shared CLI surface used by both the
//! proxy and the test client binaries.

pub mod args;
pub mod bridge;
pub mod error;
pub mod logging;

pub use args::{parse_args, BridgeArgs};
pub use bridge::{BridgeRuntime, ProviderCredentials};
pub use error::{BridgeError, Result};
pub use logging::init_logging;
