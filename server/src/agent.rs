//! # Agent Stream Handling
//!
//! Entry point for the agent's "Make" call: upgrades to a WebSocket,
//! validates the `pmm-agent-uuid` header, waits for an accepted TCP
//! connection to pair with (§4.3), runs the dial handshake, and then hands
//! off to the byte pump (§4.4). One attached stream services exactly one
//! paired session before the connection ends — the agent is expected to
//! reconnect for further work, mirroring the teacher client's own
//! reconnect loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};
use tunnel_protocol::AGENT_ID_HEADER;

use crate::error::GatewayError;
use crate::pairing;
use crate::pump;
use crate::registry::AgentId;
use crate::state::AppState;

pub type WsSink = SplitSink<WebSocket, Message>;
pub type WsStream = SplitStream<WebSocket>;

/// `GET /agent/stream` — the agent's long-lived bidirectional "Make" call.
///
/// The `pmm-agent-uuid` header is read before upgrading: a missing or
/// duplicate value fails the request outright with `400 Bad Request`
/// rather than upgrading and then tearing the stream back down.
pub async fn stream_handler(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    match extract_agent_id(&headers) {
        Ok(agent_id) => ws
            .on_upgrade(move |socket| run_attached_stream(socket, state, agent_id))
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Reads the agent identifier from stream metadata (§6). The header name
/// is matched case-insensitively by `HeaderMap`; the value is lowercased
/// on read. Missing or multi-valued headers are protocol errors.
fn extract_agent_id(headers: &HeaderMap) -> Result<AgentId, GatewayError> {
    let mut values = headers.get_all(AGENT_ID_HEADER).iter();
    let first = values.next().ok_or_else(|| {
        GatewayError::Validation(format!("missing required header {AGENT_ID_HEADER}"))
    })?;
    if values.next().is_some() {
        return Err(GatewayError::Validation(format!(
            "header {AGENT_ID_HEADER} must be single-valued"
        )));
    }
    let raw = first
        .to_str()
        .map_err(|_| GatewayError::Validation(format!("header {AGENT_ID_HEADER} is not valid UTF-8")))?;
    AgentId::parse(raw)
}

async fn run_attached_stream(socket: WebSocket, state: AppState, agent_id: AgentId) {
    info!(agent_id = %agent_id, "agent stream attached");
    let _guard = state.attach(agent_id.clone());

    let (mut sink, mut stream) = socket.split();

    let (tunnel, tcp) = pairing::wait_for_work(&state.registry, &agent_id).await;

    match pairing::dial_handshake(&mut sink, &mut stream, &tunnel.dial).await {
        Ok(()) => {
            info!(agent_id = %agent_id, listen = %tunnel.listen_addr, dial = %tunnel.dial, "session paired, starting byte pump");
            pump::run(sink, stream, tcp).await;
            info!(agent_id = %agent_id, listen = %tunnel.listen_addr, "session ended");
        }
        Err(e) => {
            warn!(agent_id = %agent_id, listen = %tunnel.listen_addr, error = %e, "dial handshake failed, closing accepted connection");
            drop(tcp);
        }
    }
}

/// Encodes `frame` and sends it as a binary WebSocket message.
pub async fn send_frame<T: Serialize>(sink: &mut WsSink, frame: &T) -> Result<(), GatewayError> {
    let bytes = tunnel_protocol::encode(frame)
        .map_err(|e| GatewayError::Protocol(e.to_string()))?;
    sink.send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

/// Receives and decodes the next binary frame. Returns `Ok(None)` if the
/// agent closed the stream cleanly. Ping/pong/text frames are ignored —
/// the protocol is binary-only.
pub async fn recv_frame<T: DeserializeOwned>(stream: &mut WsStream) -> Result<Option<T>, GatewayError> {
    loop {
        match stream.next().await {
            None => return Ok(None),
            Some(Ok(Message::Binary(bytes))) => {
                return tunnel_protocol::decode(&bytes)
                    .map(Some)
                    .map_err(|e| GatewayError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(GatewayError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_is_validation_error() {
        let headers = HeaderMap::new();
        let err = extract_agent_id(&headers).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn duplicate_header_is_validation_error() {
        let mut headers = HeaderMap::new();
        headers.append(AGENT_ID_HEADER, HeaderValue::from_static("a1"));
        headers.append(AGENT_ID_HEADER, HeaderValue::from_static("a2"));
        let err = extract_agent_id(&headers).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn header_is_lowercased() {
        let mut headers = HeaderMap::new();
        headers.append(AGENT_ID_HEADER, HeaderValue::from_static("A3F8-B2C1"));
        let agent_id = extract_agent_id(&headers).unwrap();
        assert_eq!(&*agent_id, "a3f8-b2c1");
    }
}
