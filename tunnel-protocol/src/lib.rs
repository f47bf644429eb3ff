//! # Gateway ↔ Agent Wire Contract
//!
//! Defines the frames exchanged on an agent's bidirectional "Make" stream
//! once it is attached to the gateway, plus the small helpers used to
//! encode/decode them as `bincode` on the wire.
//!
//! The two directions use distinct enums because the first frame of each
//! direction is special (`DialRequest` / `DialResponse`) and nothing enforces
//! at the type level that a `DialResponse` can't be sent twice — that
//! sequencing is a protocol-level invariant, checked by the gateway's
//! pairing step, not by the wire format itself.

use serde::{Deserialize, Serialize};

/// HTTP header (and, historically, gRPC metadata key) carrying the agent's
/// identifier on the stream-attach request. Read case-insensitively; the
/// gateway lowercases the value before using it as a registry key.
pub const AGENT_ID_HEADER: &str = "pmm-agent-uuid";

/// Maximum payload carried by one outbound `Data` frame. Larger TCP reads
/// are naturally split across multiple frames by the pump's read buffer.
pub const DATA_CHUNK_SIZE: usize = 4096;

/// Frames sent from the gateway to an attached agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToAgent {
    /// Sent exactly once, immediately after pairing, asking the agent to
    /// dial `dial` (a `host:port` string) in its own network.
    DialRequest { dial: String },

    /// Proxied bytes travelling toward the agent's dialed connection, or a
    /// half-close/error signal. Sent zero or more times after a successful
    /// `DialResponse`.
    Data {
        data: Vec<u8>,
        closed: bool,
        error: String,
    },
}

/// Frames sent from an attached agent to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToGateway {
    /// Sent exactly once, in response to `ToAgent::DialRequest`. An empty
    /// `error` means the agent's dial succeeded and byte pumping may begin.
    DialResponse { error: String },

    /// Proxied bytes travelling toward the local accepted TCP connection,
    /// or a half-close/error signal.
    Data {
        data: Vec<u8>,
        closed: bool,
        error: String,
    },
}

impl ToGateway {
    /// `true` for a `Data` frame carrying neither bytes nor an error — a
    /// pure half-close notification.
    pub fn is_plain_close(&self) -> bool {
        matches!(
            self,
            ToGateway::Data { data, error, closed: true } if data.is_empty() && error.is_empty()
        )
    }
}

/// Errors that can occur while encoding or decoding a wire frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[source] bincode::Error),
}

/// Encode a frame (either direction) into its binary wire representation.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(frame).map_err(CodecError::Encode)
}

/// Decode a binary wire frame back into its typed representation.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_request_round_trips() {
        let frame = ToAgent::DialRequest {
            dial: "10.0.0.5:5432".to_string(),
        };
        let bytes = encode(&frame).unwrap();
        let decoded: ToAgent = decode(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn dial_response_error_round_trips() {
        let frame = ToGateway::DialResponse {
            error: "connection refused".to_string(),
        };
        let bytes = encode(&frame).unwrap();
        let decoded: ToGateway = decode(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn data_frame_round_trips_with_binary_payload() {
        let frame = ToGateway::Data {
            data: vec![0u8, 1, 2, 255, 254],
            closed: false,
            error: String::new(),
        };
        let bytes = encode(&frame).unwrap();
        let decoded: ToGateway = decode(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn plain_close_detection() {
        let close = ToGateway::Data {
            data: Vec::new(),
            closed: true,
            error: String::new(),
        };
        assert!(close.is_plain_close());

        let data = ToGateway::Data {
            data: vec![1],
            closed: true,
            error: String::new(),
        };
        assert!(!data.is_plain_close());

        let err = ToGateway::Data {
            data: Vec::new(),
            closed: true,
            error: "boom".to_string(),
        };
        assert!(!err.is_plain_close());
    }

    #[test]
    fn decode_garbage_is_an_error() {
        let garbage = [0xffu8; 3];
        let result: Result<ToAgent, _> = decode(&garbage);
        assert!(result.is_err());
    }
}
