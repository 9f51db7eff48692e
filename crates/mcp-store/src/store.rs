use crate::error::Result;
use crate::paths::{config_root, server_hash};
use crate::records::{ServerRecord, SERVER_FILE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// File-per-record store rooted at the per-user configuration directory.
///
/// Reads tolerate both absence and schema drift (a record that fails to
/// parse is treated as absent, never as a fatal error); writes are
/// atomic with respect to readers in other processes.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    /// Open the store at the default root (honoring `MCP_REMOTE_CONFIG_DIR`).
    pub fn open() -> Result<Self> {
        Ok(Self {
            root: config_root()?,
        })
    }

    /// Open a store rooted at an explicit directory.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all records for a server hash.
    pub fn server_dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    fn record_path(&self, hash: &str, file: &str) -> PathBuf {
        self.server_dir(hash).join(file)
    }

    /// Read and validate a JSON record. Absent files and files whose
    /// shape no longer matches `T` both return `None`.
    pub fn read_json<T: DeserializeOwned>(&self, hash: &str, file: &str) -> Result<Option<T>> {
        let path = self.record_path(hash, file);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unreadable record {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Atomically create or replace a JSON record.
    pub fn write_json<T: Serialize>(&self, hash: &str, file: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string_pretty(value)?;
        self.write_bytes(hash, file, data.as_bytes())
    }

    /// Read a plain-text record (the PKCE verifier).
    pub fn read_text(&self, hash: &str, file: &str) -> Result<Option<String>> {
        let path = self.record_path(hash, file);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically create or replace a plain-text record.
    pub fn write_text(&self, hash: &str, file: &str, value: &str) -> Result<()> {
        self.write_bytes(hash, file, value.as_bytes())
    }

    fn write_bytes(&self, hash: &str, file: &str, data: &[u8]) -> Result<()> {
        let dir = self.server_dir(hash);
        fs::create_dir_all(&dir)?;

        // Write-to-temp + rename in the same directory, so concurrent
        // readers see either the old record or the new one.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.flush()?;
        restrict_permissions(tmp.path())?;
        tmp.persist(self.record_path(hash, file))
            .map_err(|e| e.error)?;

        debug!("Wrote record {}/{}", hash, file);
        Ok(())
    }

    /// Remove a record. Removing an absent record is not an error.
    pub fn delete(&self, hash: &str, file: &str) -> Result<()> {
        let path = self.record_path(hash, file);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted record {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a record if and only if it does not already exist. This is
    /// the lock-acquisition primitive: exactly one concurrent caller
    /// observes `true`.
    pub fn create_exclusive<T: Serialize>(&self, hash: &str, file: &str, value: &T) -> Result<bool> {
        let dir = self.server_dir(hash);
        fs::create_dir_all(&dir)?;

        let path = self.record_path(hash, file);
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create_new(true);
        let mut handle = match opts.open(&path) {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        handle.write_all(serde_json::to_string_pretty(value)?.as_bytes())?;
        handle.flush()?;
        restrict_permissions(&path)?;
        Ok(true)
    }

    /// Record the URL behind this server hash, enabling [`prune`](Self::prune).
    pub fn record_server_url(&self, hash: &str, url: &str) -> Result<()> {
        self.write_json(hash, SERVER_FILE, &ServerRecord { url: url.to_string() })
    }

    /// Drop server directories whose stored URL is not in `live_urls`
    /// or no longer hashes to the directory name. Directories without a
    /// `server.json` are left alone.
    pub fn prune(&self, live_urls: &[String]) -> Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();

            let record: Option<ServerRecord> = self.read_json(&dir_name, SERVER_FILE)?;
            let Some(record) = record else { continue };

            let live = live_urls.iter().any(|url| *url == record.url);
            if live && server_hash(&record.url) == dir_name {
                continue;
            }

            debug!("Pruning stale server directory {:?} ({})", entry.path(), record.url);
            fs::remove_dir_all(entry.path())?;
        }

        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{LockRecord, StoredTokens, LOCK_FILE, TOKENS_FILE};
    use tempfile::tempdir;

    fn sample_tokens() -> StoredTokens {
        StoredTokens {
            access_token: "access123".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh123".into()),
            expires_at: None,
            scope: Some("openid email profile".into()),
        }
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());
        let hash = server_hash("https://example.com/sse");

        store.write_json(&hash, TOKENS_FILE, &sample_tokens()).unwrap();
        let loaded: StoredTokens = store.read_json(&hash, TOKENS_FILE).unwrap().unwrap();
        assert_eq!(loaded, sample_tokens());
    }

    #[test]
    fn test_absent_and_malformed_records_read_as_none() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());
        let hash = server_hash("https://example.com/sse");

        let absent: Option<StoredTokens> = store.read_json(&hash, TOKENS_FILE).unwrap();
        assert!(absent.is_none());

        store.write_text(&hash, TOKENS_FILE, "{not json").unwrap();
        let malformed: Option<StoredTokens> = store.read_json(&hash, TOKENS_FILE).unwrap();
        assert!(malformed.is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());
        let hash = server_hash("https://example.com/sse");

        store.delete(&hash, TOKENS_FILE).unwrap();
        store.write_json(&hash, TOKENS_FILE, &sample_tokens()).unwrap();
        store.delete(&hash, TOKENS_FILE).unwrap();
        store.delete(&hash, TOKENS_FILE).unwrap();

        let gone: Option<StoredTokens> = store.read_json(&hash, TOKENS_FILE).unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn test_create_exclusive_admits_exactly_one() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());
        let hash = server_hash("https://example.com/sse");
        let lock = LockRecord {
            pid: 1234,
            port: 3334,
            timestamp: 0,
        };

        assert!(store.create_exclusive(&hash, LOCK_FILE, &lock).unwrap());
        assert!(!store.create_exclusive(&hash, LOCK_FILE, &lock).unwrap());

        store.delete(&hash, LOCK_FILE).unwrap();
        assert!(store.create_exclusive(&hash, LOCK_FILE, &lock).unwrap());
    }

    #[test]
    fn test_prune_drops_stale_directories() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());

        let live_url = "https://live.example/mcp".to_string();
        let stale_url = "https://stale.example/mcp".to_string();
        let live_hash = server_hash(&live_url);
        let stale_hash = server_hash(&stale_url);

        store.record_server_url(&live_hash, &live_url).unwrap();
        store.record_server_url(&stale_hash, &stale_url).unwrap();

        store.prune(&[live_url]).unwrap();

        assert!(store.server_dir(&live_hash).exists());
        assert!(!store.server_dir(&stale_hash).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_records_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = ConfigStore::with_root(dir.path());
        let hash = server_hash("https://example.com/sse");

        store.write_json(&hash, TOKENS_FILE, &sample_tokens()).unwrap();
        let mode = fs::metadata(store.server_dir(&hash).join(TOKENS_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
