use crate::error::{Result, TransportError};
use crate::session::{RemoteSession, TransportType};
use crate::{http, sse, TransportConfig};
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Connection attempts before the server is declared unreachable.
const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Auth-challenge retries per connect call.
const MAX_AUTH_ATTEMPTS: u32 = 1;

/// Policy over {HTTP-stream, SSE}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStrategy {
    #[default]
    HttpFirst,
    SseFirst,
    HttpOnly,
    SseOnly,
}

impl TransportStrategy {
    /// Parse a CLI value; unknown values fall back to the default
    /// silently.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    /// Transports to try, in order.
    pub fn candidates(&self) -> &'static [TransportType] {
        match self {
            TransportStrategy::HttpFirst => &[TransportType::Http, TransportType::Sse],
            TransportStrategy::SseFirst => &[TransportType::Sse, TransportType::Http],
            TransportStrategy::HttpOnly => &[TransportType::Http],
            TransportStrategy::SseOnly => &[TransportType::Sse],
        }
    }
}

impl FromStr for TransportStrategy {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "http-first" => Ok(TransportStrategy::HttpFirst),
            "sse-first" => Ok(TransportStrategy::SseFirst),
            "http-only" => Ok(TransportStrategy::HttpOnly),
            "sse-only" => Ok(TransportStrategy::SseOnly),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportStrategy::HttpFirst => "http-first",
            TransportStrategy::SseFirst => "sse-first",
            TransportStrategy::HttpOnly => "http-only",
            TransportStrategy::SseOnly => "sse-only",
        };
        write!(f, "{}", s)
    }
}

/// Where the selector gets bearer credentials. Implemented by the
/// bridge over the OAuth provider; kept as a trait here so the
/// transport layer does not depend on the auth stack.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current token, if one is already available. Never interactive.
    async fn bearer(&self) -> Result<Option<String>>;

    /// Run (or wait out) the interactive flow and return a fresh token.
    async fn authorize(&self) -> Result<String>;
}

/// Exponential backoff with jitter: base 1s, cap 30s, reset on success.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            attempt: 0,
        }
    }

    /// Delay for the next retry; grows 2x per call up to the cap, with
    /// a ±25% jitter so simultaneous processes spread out.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32 << self.attempt.min(5))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        exp.mul_f64(jitter).min(self.cap)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements the per-attempt state machine: try the primary transport,
/// yield to the auth flow on a challenge, fall back to the secondary on
/// network errors for `*-first` strategies, back off otherwise. The
/// first successful connection locks the transport in for the lifetime
/// of the selector; reconnects do not oscillate.
pub struct TransportSelector {
    config: TransportConfig,
    strategy: TransportStrategy,
    credentials: Option<Arc<dyn CredentialSource>>,
    locked_in: Option<TransportType>,
    backoff: Backoff,
}

impl TransportSelector {
    pub fn new(
        config: TransportConfig,
        strategy: TransportStrategy,
        credentials: Option<Arc<dyn CredentialSource>>,
    ) -> Self {
        Self {
            config,
            strategy,
            credentials,
            locked_in: None,
            backoff: Backoff::new(),
        }
    }

    pub fn transport_type(&self) -> Option<TransportType> {
        self.locked_in
    }

    /// Produce a live session, driving auth and fallback as needed.
    pub async fn connect(&mut self) -> Result<RemoteSession> {
        // Fatal before any network I/O.
        Url::parse(&self.config.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", self.config.url, e)))?;

        let mut auth_attempts = 0;
        let mut connect_attempts = 0;

        loop {
            connect_attempts += 1;

            match self.attempt().await {
                Ok(session) => {
                    self.backoff.reset();
                    info!("Connected via {}", session.transport_type());
                    return Ok(session);
                }
                Err(e) if e.is_auth_challenge() => {
                    if auth_attempts >= MAX_AUTH_ATTEMPTS {
                        return Err(TransportError::AuthExhausted);
                    }
                    auth_attempts += 1;

                    let credentials = self.credentials.as_ref().ok_or(e)?;
                    info!("Server requires authorization, starting OAuth flow");
                    let token = credentials.authorize().await?;
                    self.config.bearer = Some(token);
                }
                Err(e) if e.is_recoverable() => {
                    if connect_attempts >= MAX_CONNECT_ATTEMPTS {
                        return Err(TransportError::Unreachable(e.to_string()));
                    }
                    let delay = self.backoff.next_delay();
                    warn!("Connection failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass over the candidate transports. An auth challenge
    /// surfaces immediately (falling back would just hit the same 401);
    /// a network error on the primary moves on to the secondary.
    async fn attempt(&mut self) -> Result<RemoteSession> {
        if let Some(credentials) = &self.credentials {
            if self.config.bearer.is_none() {
                self.config.bearer = credentials.bearer().await?;
            }
        }

        let candidates: Vec<TransportType> = match self.locked_in {
            Some(locked) => vec![locked],
            None => self.strategy.candidates().to_vec(),
        };

        let mut last_err = None;
        for transport_type in candidates {
            debug!("Trying {} transport", transport_type);
            match self.try_transport(transport_type).await {
                Ok(session) => {
                    self.locked_in = Some(transport_type);
                    return Ok(session);
                }
                Err(e) if e.is_auth_challenge() => return Err(e),
                Err(e) if e.is_recoverable() => {
                    debug!("{} transport failed: {}", transport_type, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(TransportError::Closed))
    }

    async fn try_transport(&self, transport_type: TransportType) -> Result<RemoteSession> {
        match transport_type {
            TransportType::Http => http::connect(&self.config).await,
            TransportType::Sse => sse::connect(&self.config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_with_silent_fallback() {
        assert_eq!(
            TransportStrategy::parse_or_default("sse-only"),
            TransportStrategy::SseOnly
        );
        assert_eq!(
            TransportStrategy::parse_or_default("http-first"),
            TransportStrategy::HttpFirst
        );
        assert_eq!(
            TransportStrategy::parse_or_default("invalid"),
            TransportStrategy::HttpFirst
        );
        assert_eq!(
            TransportStrategy::parse_or_default(""),
            TransportStrategy::HttpFirst
        );
    }

    #[test]
    fn test_strategy_candidate_order() {
        assert_eq!(
            TransportStrategy::HttpFirst.candidates(),
            &[TransportType::Http, TransportType::Sse]
        );
        assert_eq!(
            TransportStrategy::SseFirst.candidates(),
            &[TransportType::Sse, TransportType::Http]
        );
        assert_eq!(
            TransportStrategy::SseOnly.candidates(),
            &[TransportType::Sse]
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new();

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(1500) && second <= Duration::from_millis(2500));

        // Drive it past the cap.
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(30));
        }

        backoff.reset();
        let after_reset = backoff.next_delay();
        assert!(after_reset <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal_before_io() {
        let mut selector = TransportSelector::new(
            TransportConfig::new("not a url"),
            TransportStrategy::HttpFirst,
            None,
        );
        match selector.connect().await {
            Err(TransportError::InvalidUrl(_)) => {}
            other => panic!("expected InvalidUrl, got {:?}", other.map(|_| ())),
        }
    }
}
