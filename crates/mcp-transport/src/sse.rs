use crate::error::{classify_status, Result, TransportError};
use crate::http::build_headers;
use crate::session::{RemoteSession, TransportType};
use crate::{TransportConfig, CONNECT_TIMEOUT};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

/// Connect over the SSE transport: a long-lived GET event stream for
/// server messages, and a POST endpoint (announced by the server's
/// `endpoint` event) for client messages.
pub(crate) async fn connect(config: &TransportConfig) -> Result<RemoteSession> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    let headers = build_headers(config)?;
    let resp = client
        .get(&config.url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .headers(headers)
        .send()
        .await
        .map_err(|e| TransportError::Connect(format!("SSE connect failed: {}", e)))?;

    if let Some(err) = classify_status(resp.status()) {
        return Err(err);
    }

    let mut events = resp.bytes_stream().eventsource();

    // The server's first event names the POST endpoint for this session.
    let post_url = tokio::time::timeout(CONNECT_TIMEOUT, async {
        while let Some(event) = events.next().await {
            let event = event
                .map_err(|e| TransportError::Connect(format!("SSE stream error: {}", e)))?;
            if event.event == "endpoint" {
                return resolve_endpoint(&config.url, &event.data);
            }
            debug!("Ignoring pre-endpoint event: {}", event.event);
        }
        Err(TransportError::Protocol(
            "SSE stream closed before an endpoint event".to_string(),
        ))
    })
    .await
    .map_err(|_| TransportError::Connect("timed out waiting for endpoint event".to_string()))??;

    debug!("SSE transport connected, posting to {}", post_url);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();

    // Writer: drain outgoing messages into the POST endpoint.
    let writer_client = client.clone();
    let writer_config = config.clone();
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let headers = match build_headers(&writer_config) {
                Ok(headers) => headers,
                Err(e) => {
                    warn!("SSE writer stopped: {}", e);
                    return;
                }
            };
            match writer_client
                .post(post_url.clone())
                .headers(headers)
                .json(&message)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    warn!("SSE POST returned {}", resp.status());
                    if matches!(resp.status().as_u16(), 401 | 403) {
                        return;
                    }
                }
                Err(e) => {
                    warn!("SSE POST failed: {}", e);
                    return;
                }
            }
        }
    });

    // Reader: the driver. Its termination closes the incoming channel,
    // which the bridge observes as the session ending.
    let driver = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) if event.event == "message" => {
                    match serde_json::from_str::<Value>(&event.data) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Discarding unparseable SSE message: {}", e),
                    }
                }
                Ok(event) => debug!("Ignoring SSE event: {}", event.event),
                Err(e) => {
                    warn!("SSE stream error: {}", e);
                    return;
                }
            }
        }
    });

    Ok(RemoteSession::new(TransportType::Sse, out_tx, in_rx, driver))
}

/// The endpoint event carries either a bare URI or a JSON string;
/// relative forms resolve against the SSE URL.
fn resolve_endpoint(base: &str, data: &str) -> Result<Url> {
    let raw = match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        _ => data.trim().to_string(),
    };

    let base = Url::parse(base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    base.join(&raw)
        .map_err(|e| TransportError::Protocol(format!("bad endpoint event '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_endpoint_relative_and_absolute() {
        let base = "https://example.com/sse";

        let relative = resolve_endpoint(base, "/messages?sessionId=42").unwrap();
        assert_eq!(
            relative.as_str(),
            "https://example.com/messages?sessionId=42"
        );

        let absolute = resolve_endpoint(base, "https://other.example.com/post").unwrap();
        assert_eq!(absolute.as_str(), "https://other.example.com/post");
    }

    #[test]
    fn test_resolve_endpoint_json_string_form() {
        let url = resolve_endpoint("https://example.com/sse", r#""/messages""#).unwrap();
        assert_eq!(url.as_str(), "https://example.com/messages");
    }
}
