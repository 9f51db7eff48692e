use crate::error::{classify_status, Result, TransportError};
use crate::session::{RemoteSession, TransportType};
use crate::{TransportConfig, CONNECT_TIMEOUT};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Connect over the streamable-HTTP transport: one POST per message,
/// with `Mcp-Session-Id` propagation and responses arriving either as
/// plain JSON or as an SSE-formatted body.
pub(crate) async fn connect(config: &TransportConfig) -> Result<RemoteSession> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    probe(&client, config).await?;
    debug!("HTTP transport connected to {}", config.url);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();

    let task_config = config.clone();
    let driver = tokio::spawn(async move {
        let mut session_id: Option<String> = None;

        while let Some(message) = out_rx.recv().await {
            match post_message(&client, &task_config, &mut session_id, &message).await {
                Ok(responses) => {
                    for response in responses {
                        if in_tx.send(response).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("HTTP transport request failed: {}", e);
                    return;
                }
            }
        }
    });

    Ok(RemoteSession::new(TransportType::Http, out_tx, in_rx, driver))
}

/// Reachability and auth probe: a GET against the endpoint. Servers
/// that reject the verb still prove they exist.
async fn probe(client: &reqwest::Client, config: &TransportConfig) -> Result<()> {
    let headers = build_headers(config)?;
    let resp = client
        .get(&config.url)
        .headers(headers)
        .send()
        .await
        .map_err(|e| TransportError::Connect(format!("probe failed: {}", e)))?;

    match classify_status(resp.status()) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

async fn post_message(
    client: &reqwest::Client,
    config: &TransportConfig,
    session_id: &mut Option<String>,
    message: &Value,
) -> Result<Vec<Value>> {
    let mut headers = build_headers(config)?;
    if let Some(id) = session_id.as_deref() {
        headers.insert(
            "Mcp-Session-Id",
            HeaderValue::from_str(id)
                .map_err(|e| TransportError::Protocol(format!("invalid session id: {}", e)))?,
        );
    }

    let resp = client
        .post(&config.url)
        .headers(headers)
        .json(message)
        .send()
        .await?;

    if let Some(id) = resp
        .headers()
        .get("Mcp-Session-Id")
        .and_then(|v| v.to_str().ok())
    {
        *session_id = Some(id.to_string());
    }

    let status = resp.status();
    // 202 Accepted with no body is the normal reply to notifications.
    if status.as_u16() == 202 {
        return Ok(Vec::new());
    }
    if let Some(err) = classify_status(status) {
        return Err(err);
    }

    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    if body.starts_with("event:") || body.contains("data:") {
        return parse_sse_body(&body);
    }

    Ok(vec![serde_json::from_str(&body)?])
}

/// Extract the JSON payloads from an SSE-formatted response body.
pub(crate) fn parse_sse_body(body: &str) -> Result<Vec<Value>> {
    let mut messages = Vec::new();
    for line in body.lines() {
        if let Some(data) = line.trim().strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                messages.push(serde_json::from_str(data)?);
            }
        }
    }
    Ok(messages)
}

/// Common headers for probe and POST: JSON in, JSON-or-SSE out,
/// operator headers verbatim, and the bearer token unless the operator
/// already supplied an Authorization header.
pub(crate) fn build_headers(config: &TransportConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );

    for (key, value) in &config.headers {
        headers.insert(
            HeaderName::from_str(key).map_err(|e| {
                TransportError::Protocol(format!("invalid header name '{}': {}", key, e))
            })?,
            HeaderValue::from_str(value).map_err(|e| {
                TransportError::Protocol(format!("invalid header value for '{}': {}", key, e))
            })?,
        );
    }

    if let Some(bearer) = &config.bearer {
        let operator_auth = config
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("authorization"));
        if !operator_auth {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", bearer))
                    .map_err(|e| TransportError::Protocol(format!("invalid token: {}", e)))?,
            );
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_body_extracts_every_data_line() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n\
                    event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n\n";
        let messages = parse_sse_body(body).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], 1);
        assert_eq!(messages[1]["method"], "ping");
    }

    #[test]
    fn test_parse_sse_body_ignores_blank_data() {
        assert!(parse_sse_body("event: ping\ndata:\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_bearer_applied_when_no_operator_auth() {
        let mut config = TransportConfig::new("https://example.com/mcp");
        config.bearer = Some("tok".to_string());

        let headers = build_headers(&config).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
    }

    #[test]
    fn test_operator_authorization_header_wins() {
        let mut config = TransportConfig::new("https://example.com/mcp");
        config
            .headers
            .insert("Authorization".to_string(), "Basic abc".to_string());
        config.bearer = Some("tok".to_string());

        let headers = build_headers(&config).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic abc");
    }

    #[test]
    fn test_custom_header_value_kept_verbatim() {
        let mut config = TransportConfig::new("https://example.com/mcp");
        config
            .headers
            .insert("X-Custom".to_string(), " padded value".to_string());

        let headers = build_headers(&config).unwrap();
        assert_eq!(headers.get("X-Custom").unwrap(), " padded value");
    }
}
