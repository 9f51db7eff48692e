use crate::callback::find_free_port;
use crate::error::Result;
use mcp_store::records::{LockRecord, LOCK_FILE, TOKENS_FILE};
use mcp_store::{ConfigStore, StoredTokens};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Locks older than this are reclaimable even if their PID is alive.
pub const LOCK_STALENESS: Duration = Duration::from_secs(30 * 60);

const FOLLOWER_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FOLLOWER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const FOLLOWER_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// Role assigned by [`AuthCoordinator::coordinate`].
#[derive(Debug)]
pub enum Coordination {
    /// This process drives the interactive flow. The guard releases the
    /// lock when dropped; `port` is recorded in the lock record and must
    /// be the port the callback listener binds.
    Leader { port: u16, guard: LockGuard },
    /// Another live process is driving the flow on `port`.
    Follower { port: u16 },
}

/// Cross-process single-flight for the browser-based auth flow. The
/// lock record under the server hash is the only serialization point:
/// exactly one concurrent `coordinate` caller observes the leader role.
#[derive(Debug, Clone)]
pub struct AuthCoordinator {
    store: ConfigStore,
    server_hash: String,
}

impl AuthCoordinator {
    pub fn new(store: ConfigStore, server_hash: String) -> Self {
        Self { store, server_hash }
    }

    /// Elect a role. Acquisition is create-exclusive on the lock record;
    /// a lock whose PID is dead or whose timestamp is past the staleness
    /// window is reclaimed and acquisition retried.
    pub fn coordinate(&self, desired_port: u16) -> Result<Coordination> {
        loop {
            if let Some(lock) = self.read_live_lock()? {
                info!(
                    "Auth already in progress in pid {} on port {}",
                    lock.pid, lock.port
                );
                return Ok(Coordination::Follower { port: lock.port });
            }

            let port = find_free_port(desired_port)?;
            let record = LockRecord {
                pid: process::id(),
                port,
                timestamp: unix_now(),
            };

            if self.store.create_exclusive(&self.server_hash, LOCK_FILE, &record)? {
                debug!("Acquired auth lock on port {}", port);
                return Ok(Coordination::Leader {
                    port,
                    guard: LockGuard {
                        store: self.store.clone(),
                        server_hash: self.server_hash.clone(),
                        released: false,
                    },
                });
            }
            // Lost the creation race; re-read the winner's lock.
        }
    }

    /// Read the current lock, reclaiming it if stale.
    fn read_live_lock(&self) -> Result<Option<LockRecord>> {
        let Some(lock) = self
            .store
            .read_json::<LockRecord>(&self.server_hash, LOCK_FILE)?
        else {
            return Ok(None);
        };

        let age = unix_now().saturating_sub(lock.timestamp);
        if age > LOCK_STALENESS.as_secs() {
            info!("Reclaiming stale auth lock ({}s old)", age);
            self.store.delete(&self.server_hash, LOCK_FILE)?;
            return Ok(None);
        }

        if !is_pid_running(lock.pid) {
            info!("Reclaiming auth lock held by dead pid {}", lock.pid);
            self.store.delete(&self.server_hash, LOCK_FILE)?;
            return Ok(None);
        }

        Ok(Some(lock))
    }

    /// Follower path: poll the leader's `/wait-for-auth` endpoint until
    /// the flow completes, then read the tokens the leader wrote.
    ///
    /// Returns `None` when the leader vanished without writing tokens
    /// (crash or cancellation); the caller retries coordination.
    pub async fn wait_for_leader(&self, port: u16) -> Result<Option<StoredTokens>> {
        let client = reqwest::Client::builder()
            .timeout(FOLLOWER_REQUEST_TIMEOUT)
            .build()?;
        let poll_id = Uuid::new_v4();
        let url = format!("http://127.0.0.1:{}/wait-for-auth?pollId={}", port, poll_id);

        let deadline = tokio::time::Instant::now() + FOLLOWER_MAX_WAIT;

        while tokio::time::Instant::now() < deadline {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Leader reports authorization complete");
                    return Ok(self
                        .store
                        .read_json::<StoredTokens>(&self.server_hash, TOKENS_FILE)?);
                }
                Ok(resp) if resp.status().as_u16() == 202 => {
                    // Still pending; fall through to the sleep below.
                }
                Ok(resp) => {
                    warn!("Unexpected wait-for-auth status {}", resp.status());
                }
                Err(e) => {
                    debug!("Leader endpoint unreachable: {}", e);
                    // The listener is gone. If the lock is gone too and no
                    // tokens were written, the leader failed: retry election.
                    if self.read_live_lock()?.is_none() {
                        let tokens = self
                            .store
                            .read_json::<StoredTokens>(&self.server_hash, TOKENS_FILE)?;
                        return Ok(tokens);
                    }
                }
            }

            tokio::time::sleep(FOLLOWER_POLL_INTERVAL).await;
        }

        warn!("Timed out waiting for the leader to finish authorization");
        Ok(None)
    }

    /// Release the lock if this process holds it. Shutdown paths and
    /// `invalidate(all)` use this; a follower must never delete the
    /// leader's lock.
    pub fn release_if_held(&self) -> Result<()> {
        if let Some(lock) = self
            .store
            .read_json::<LockRecord>(&self.server_hash, LOCK_FILE)?
        {
            if lock.pid == process::id() {
                self.store.delete(&self.server_hash, LOCK_FILE)?;
            }
        }
        Ok(())
    }
}

/// Releases the auth lock when dropped, so a cancelled leader never
/// strands its followers past the staleness window.
#[derive(Debug)]
pub struct LockGuard {
    store: ConfigStore,
    server_hash: String,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.store.delete(&self.server_hash, LOCK_FILE) {
            warn!("Failed to release auth lock: {}", e);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Liveness probe for the PID in a lock record.
fn is_pid_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::{Command, Stdio};

        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        use std::process::{Command, Stdio};

        Command::new("tasklist")
            .arg("/FI")
            .arg(format!("PID eq {}", pid))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}
