//! Socket.io v1 WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A parsed `5:` event frame: `{"name": ..., "args": [...]}`.
#[derive(Debug, Clone)]
pub struct PushFrame {
    pub name: String,
    /// First element of `args`, which is where this protocol puts the payload.
    pub arg: serde_json::Value,
}

pub struct PushSocket {
    stream: WsStream,
}

impl PushSocket {
    /// Connect to the socket.io WebSocket endpoint for a negotiated session.
    pub async fn connect(base_url: &str, session_id: &str) -> Result<Self> {
        let ws_url = format!(
            "{}/socket.io/1/websocket/{}",
            base_url.trim_end_matches('/'),
            session_id
        )
        .replace("https://", "wss://")
        .replace("http://", "ws://");

        tracing::info!("Connecting WebSocket to {}", ws_url);

        let (stream, response) = connect_async(&ws_url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Emit a socket.io event frame: `5:::{"name": ..., "args": [arg]}`.
    pub async fn emit_event(&mut self, name: &str, arg: serde_json::Value) -> Result<()> {
        let body = serde_json::json!({ "name": name, "args": [arg] });
        self.send_text(&format!("5:::{}", body)).await
    }

    /// Receive the next text frame, ignoring pings/pongs.
    ///
    /// Event frames carrying an ack id (`5:ID::`) are acked automatically
    /// with `6:ID::`; without acks the server retries delivery indefinitely
    /// and blocks new events behind the unacked one.
    pub async fn recv_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);

                    if let Some(ack_id) = extract_ack_id(&text) {
                        let ack = format!("6:{}::", ack_id);
                        tracing::debug!("Socket.io ack: {}", ack);
                        if let Err(e) = self.stream.send(Message::Text(ack)).await {
                            tracing::warn!("Failed to send socket.io ack: {:#}", e);
                        }
                    }

                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }
}

/// Negotiate a socket.io v1 session, returning the session id.
///
/// Handshake response format: `{session_id}:{heartbeat}:{close}:{transports}`.
pub async fn negotiate(http: &reqwest::Client, base_url: &str) -> Result<String> {
    let url = format!(
        "{}/socket.io/1/?t={}",
        base_url.trim_end_matches('/'),
        chrono::Utc::now().timestamp_millis()
    );

    tracing::info!("Negotiating push session...");
    tracing::debug!("Session URL: {}", url);

    let resp = http
        .get(&url)
        .send()
        .await
        .context("Push session negotiation request failed")?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("Push session negotiation failed: {} — {}", status, text);
    }

    let session_id = text
        .split(':')
        .next()
        .filter(|s| !s.is_empty())
        .context("Empty push session response")?
        .to_string();

    tracing::info!("Got push session ID: {}", session_id);
    Ok(session_id)
}

/// Parse a `5:` event frame into name + first argument.
///
/// Socket.io v1 event frames have format `5:ACK_ID:ENDPOINT:JSON`; ack id
/// and endpoint are usually empty for server pushes (`5:::{json}`).
pub fn parse_event(frame: &str) -> Option<PushFrame> {
    let rest = frame.strip_prefix("5:")?;
    let json_start = rest.find("::").map(|pos| pos + 2)?;
    let json_str = &rest[json_start..];
    if !json_str.starts_with('{') {
        return None;
    }

    let v: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let name = v.get("name")?.as_str()?.to_string();
    let arg = v
        .get("args")
        .and_then(|a| a.get(0))
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    Some(PushFrame { name, arg })
}

/// Extract the ack ID from a `5:ID::` event frame, if present.
fn extract_ack_id(frame: &str) -> Option<u64> {
    let rest = frame.strip_prefix("5:")?;
    let colon_pos = rest.find(':')?;
    let id_part = &rest[..colon_pos];
    if id_part.is_empty() {
        return None;
    }
    id_part.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_basic() {
        let frame = r#"5:::{"name":"incoming_call","args":[{"callSid":"CA1","fromNumber":"+1555","ownerId":"o1"}]}"#;
        let parsed = parse_event(frame).unwrap();
        assert_eq!(parsed.name, "incoming_call");
        assert_eq!(parsed.arg["callSid"], "CA1");
    }

    #[test]
    fn test_parse_event_with_ack_id() {
        let frame = r#"5:42::{"name":"call_answered","args":[{"callSid":"CA2"}]}"#;
        let parsed = parse_event(frame).unwrap();
        assert_eq!(parsed.name, "call_answered");
        assert_eq!(extract_ack_id(frame), Some(42));
    }

    #[test]
    fn test_parse_event_no_args() {
        let frame = r#"5:::{"name":"joined"}"#;
        let parsed = parse_event(frame).unwrap();
        assert_eq!(parsed.name, "joined");
        assert!(parsed.arg.is_null());
    }

    #[test]
    fn test_parse_event_rejects_other_frames() {
        assert!(parse_event("1::").is_none());
        assert!(parse_event("2::").is_none());
        assert!(parse_event("5:::not json").is_none());
    }

    #[test]
    fn test_extract_ack_id_absent() {
        assert_eq!(extract_ack_id(r#"5:::{"name":"x"}"#), None);
    }
}
