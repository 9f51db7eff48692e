//! Per-server persisted state for the MCP bridge.
//!
//! Every remote server gets its own directory under the configuration
//! root, keyed by a stable hash of the server URL. Records are discrete
//! JSON files (plus the plain-text PKCE verifier) written atomically so
//! that concurrent bridge processes always observe either the old or
//! the new value.
//!
//! Behavior is only defined on local filesystems: lock acquisition uses
//! `O_CREAT|O_EXCL` and record writes use same-directory rename, neither
//! of which is atomic on some network mounts.

pub mod error;
pub mod paths;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use paths::{config_root, server_hash};
pub use records::{ClientCredentials, LockRecord, ServerRecord, StoredTokens};
pub use store::ConfigStore;
