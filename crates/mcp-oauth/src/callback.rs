use crate::error::{OAuthError, Result};
use crate::types::CallbackOutcome;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::Filter;

/// How long the listener waits for the user to finish authorizing.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Short-lived loopback HTTP server receiving the authorization-code
/// redirect. Serves `/oauth/callback` for the browser and
/// `/wait-for-auth` for follower processes; everything else is 404.
///
/// Two one-shot signals live here, both as watch channels so every
/// observer sees the same resolution: the callback outcome (consumed by
/// the leader) and the completion flag (consumed by the follower poll
/// route). The completion flag is raised by the leader only after the
/// tokens are on disk, which is the ordering followers rely on before
/// reading the token record.
pub struct CallbackServer {
    port: u16,
    outcome_rx: watch::Receiver<Option<CallbackOutcome>>,
    done_tx: Arc<watch::Sender<bool>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind the listener on the loopback interface. `port = 0` picks an
    /// ephemeral port; the actual port is available via [`port`](Self::port).
    /// Must be called from within a tokio runtime.
    pub fn bind(port: u16, expected_state: Option<String>) -> Result<Self> {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (done_tx, done_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let outcome_tx = Arc::new(outcome_tx);
        let done_tx = Arc::new(done_tx);

        let callback_tx = Arc::clone(&outcome_tx);
        let callback_route = warp::path!("oauth" / "callback")
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .map(move |params: HashMap<String, String>| {
                handle_callback(&callback_tx, expected_state.as_deref(), params)
            });

        let wait_route = warp::path!("wait-for-auth")
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .map(move |params: HashMap<String, String>| {
                let poll_id = params.get("pollId").cloned().unwrap_or_default();
                if *done_rx.borrow() {
                    debug!("Poll {} observed completed authorization", poll_id);
                    warp::reply::with_status(
                        warp::reply::html("Authorization complete".to_string()),
                        StatusCode::OK,
                    )
                } else {
                    warp::reply::with_status(
                        warp::reply::html("Authorization pending".to_string()),
                        StatusCode::ACCEPTED,
                    )
                }
            });

        let routes = callback_route.or(wait_route);
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let (bound, serve) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.await;
            })
            .map_err(|e| {
                OAuthError::CallbackServer(format!("failed to bind port {}: {}", port, e))
            })?;

        info!("Callback listener bound on {}", bound);

        Ok(Self {
            port: bound.port(),
            outcome_rx,
            done_tx,
            shutdown_tx: Some(shutdown_tx),
            server: tokio::spawn(serve),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI for this listener.
    pub fn redirect_uri(&self, host: &str) -> String {
        format!("http://{}:{}/oauth/callback", host, self.port)
    }

    /// Await the authorization redirect, up to [`AUTH_TIMEOUT`].
    pub async fn wait_for_code(&self) -> Result<CallbackOutcome> {
        let mut rx = self.outcome_rx.clone();

        let outcome = tokio::time::timeout(AUTH_TIMEOUT, async move {
            loop {
                if let Some(outcome) = rx.borrow().clone() {
                    return Ok(outcome);
                }
                if rx.changed().await.is_err() {
                    return Err(OAuthError::CallbackServer(
                        "listener stopped before a callback arrived".to_string(),
                    ));
                }
            }
        })
        .await
        .map_err(|_| OAuthError::AuthTimeout)??;

        Ok(outcome)
    }

    /// Flip `/wait-for-auth` to 200. Called once the tokens record has
    /// been written, never before.
    pub fn mark_complete(&self) {
        let _ = self.done_tx.send(true);
    }

    /// Tear the listener down. Idempotent with respect to Drop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.server).await;
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn handle_callback(
    tx: &watch::Sender<Option<CallbackOutcome>>,
    expected_state: Option<&str>,
    params: HashMap<String, String>,
) -> warp::reply::WithStatus<warp::reply::Html<String>> {
    if let Some(error) = params.get("error") {
        let description = params.get("error_description").cloned();
        warn!("Authorization denied by server: {}", error);
        publish(
            tx,
            CallbackOutcome::Denied {
                error: error.clone(),
                description: description.clone(),
            },
        );
        return warp::reply::with_status(
            warp::reply::html(error_page(error, description.as_deref())),
            StatusCode::OK,
        );
    }

    let Some(code) = params.get("code") else {
        warn!("Callback request without a code parameter");
        return warp::reply::with_status(
            warp::reply::html(error_page("missing authorization code", None)),
            StatusCode::BAD_REQUEST,
        );
    };

    let state = params.get("state").cloned();
    if let Some(expected) = expected_state {
        if state.as_deref() != Some(expected) {
            warn!("Callback state does not match the issued state, ignoring");
            return warp::reply::with_status(
                warp::reply::html(error_page("state mismatch", None)),
                StatusCode::BAD_REQUEST,
            );
        }
    }

    publish(
        tx,
        CallbackOutcome::Code {
            code: code.clone(),
            state,
        },
    );

    warp::reply::with_status(warp::reply::html(success_page()), StatusCode::OK)
}

/// Only the first resolution wins; a replayed redirect is ignored.
fn publish(tx: &watch::Sender<Option<CallbackOutcome>>, outcome: CallbackOutcome) {
    tx.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(outcome);
            true
        } else {
            debug!("Ignoring duplicate callback");
            false
        }
    });
}

fn success_page() -> String {
    r#"<html>
<head><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 50px;">
  <h2>Authorization successful</h2>
  <p>You may close this tab and return to your application.</p>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: Option<&str>) -> String {
    format!(
        r#"<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 50px;">
  <h2>Authorization failed</h2>
  <p><strong>{}</strong></p>
  <p>{}</p>
  <p>Please return to your terminal and try again.</p>
</body>
</html>"#,
        html_escape(error),
        html_escape(description.unwrap_or(""))
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Find a free loopback port, scanning upward from `from`. `from = 0`
/// asks the OS for any ephemeral port.
pub fn find_free_port(from: u16) -> Result<u16> {
    use std::net::TcpListener;

    if from == 0 {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        return Ok(listener.local_addr()?.port());
    }

    for port in from..=u16::MAX {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            return Ok(listener.local_addr()?.port());
        }
    }

    Err(OAuthError::CallbackServer(format!(
        "no free port at or above {}",
        from
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("plain"), "plain");
        assert_eq!(
            html_escape("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_find_free_port_scans_upward() {
        use std::net::TcpListener;

        let any = find_free_port(0).unwrap();
        assert!(any > 0);

        // Occupy a port, then ask for it: the scan must move past it.
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let held_port = held.local_addr().unwrap().port();
        let found = find_free_port(held_port).unwrap();
        assert!(found > held_port);
    }

    #[tokio::test]
    async fn test_callback_resolves_code_and_wait_endpoint_gates_on_completion() {
        let server = CallbackServer::bind(0, Some("st4te".to_string())).unwrap();
        let port = server.port();

        let pending = reqwest::get(format!("http://127.0.0.1:{}/wait-for-auth?pollId=t", port))
            .await
            .unwrap();
        assert_eq!(pending.status().as_u16(), 202);

        let redirect = reqwest::get(format!(
            "http://127.0.0.1:{}/oauth/callback?code=abc123&state=st4te",
            port
        ))
        .await
        .unwrap();
        assert_eq!(redirect.status().as_u16(), 200);

        let outcome = server.wait_for_code().await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Code {
                code: "abc123".to_string(),
                state: Some("st4te".to_string()),
            }
        );

        // Followers must not observe completion until the leader says so
        // (tokens are written between these two points).
        let still_pending =
            reqwest::get(format!("http://127.0.0.1:{}/wait-for-auth?pollId=t", port))
                .await
                .unwrap();
        assert_eq!(still_pending.status().as_u16(), 202);

        server.mark_complete();
        let done = reqwest::get(format!("http://127.0.0.1:{}/wait-for-auth?pollId=t", port))
            .await
            .unwrap();
        assert_eq!(done.status().as_u16(), 200);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_with_wrong_state_is_ignored() {
        let server = CallbackServer::bind(0, Some("expected".to_string())).unwrap();
        let port = server.port();

        let redirect = reqwest::get(format!(
            "http://127.0.0.1:{}/oauth/callback?code=abc&state=forged",
            port
        ))
        .await
        .unwrap();
        assert_eq!(redirect.status().as_u16(), 400);

        let still_pending =
            reqwest::get(format!("http://127.0.0.1:{}/wait-for-auth?pollId=t", port))
                .await
                .unwrap();
        assert_eq!(still_pending.status().as_u16(), 202);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_redirect_resolves_denied() {
        let server = CallbackServer::bind(0, None).unwrap();
        let port = server.port();

        reqwest::get(format!(
            "http://127.0.0.1:{}/oauth/callback?error=access_denied&error_description=nope",
            port
        ))
        .await
        .unwrap();

        let outcome = server.wait_for_code().await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Denied {
                error: "access_denied".to_string(),
                description: Some("nope".to_string()),
            }
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_routes_are_404() {
        let server = CallbackServer::bind(0, None).unwrap();
        let port = server.port();

        let resp = reqwest::get(format!("http://127.0.0.1:{}/anything-else", port))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);

        server.shutdown().await;
    }
}
