use crate::error::{Result, StoreError};
use sha2::{Digest, Sha256};
use std::env;
use std::path::PathBuf;

/// Environment variable overriding the storage root (replaces the home
/// directory component, not the `.mcp-auth` suffix).
pub const CONFIG_DIR_ENV: &str = "MCP_REMOTE_CONFIG_DIR";

/// Directory name under the root; the version suffix is bumped whenever
/// the record schema changes incompatibly.
fn version_dir() -> String {
    format!("mcp-remote-{}", env!("CARGO_PKG_VERSION_MAJOR"))
}

/// Resolve the configuration root: `$MCP_REMOTE_CONFIG_DIR` if set,
/// otherwise `$HOME`/`%USERPROFILE%`, then `.mcp-auth/mcp-remote-<major>/`.
pub fn config_root() -> Result<PathBuf> {
    let base = match env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = env::var_os("HOME")
                .or_else(|| env::var_os("USERPROFILE"))
                .ok_or(StoreError::NoHomeDir)?;
            PathBuf::from(home)
        }
    };

    Ok(base.join(".mcp-auth").join(version_dir()))
}

/// Reduce a server URL to its stable storage key: lowercase hex SHA-256
/// of the URL string, truncated to 32 characters.
pub fn server_hash(server_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server_url.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(32);
    for byte in &digest[..16] {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}
