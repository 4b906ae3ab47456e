//! Relay attach frames and close reasons.
//!
//! The relay inspects only the attach handshake. After attach, daemon
//! frames are broadcast verbatim to every client side; client frames are
//! wrapped in `from_client` so the daemon can demultiplex. Daemon-authored
//! `to_client`/`broadcast` envelopes are opaque to the relay — clients
//! filter on the `client_id` learned from `joined`.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Frames exchanged with the relay.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Daemon side: claim a named session.
    Register { session_id: String },

    /// Client side: attach to a named session.
    Join { session_id: String },

    /// Relay → client: attach accepted; `client_id` is the ephemeral id
    /// used to demultiplex replies.
    Joined { client_id: String },

    /// Relay → daemon: a frame from one attached client.
    FromClient {
        client_id: String,
        frame: Box<RawValue>,
    },

    /// Daemon → relay (broadcast to clients): a frame addressed to one client.
    ToClient {
        client_id: String,
        frame: Box<RawValue>,
    },

    /// Daemon → relay (broadcast to clients): a frame for every client.
    Broadcast { frame: Box<RawValue> },
}

impl RelayFrame {
    pub fn from_client(client_id: &str, frame: &str) -> serde_json::Result<Self> {
        Ok(RelayFrame::FromClient {
            client_id: client_id.to_owned(),
            frame: RawValue::from_string(frame.to_owned())?,
        })
    }

    pub fn to_client(client_id: &str, frame: &str) -> serde_json::Result<Self> {
        Ok(RelayFrame::ToClient {
            client_id: client_id.to_owned(),
            frame: RawValue::from_string(frame.to_owned())?,
        })
    }
}

/// Application close reasons. Carried as WebSocket close reasons; the relay
/// never sends in-band error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    InvalidSession,
    SessionReplaced,
    BackpressureExceeded,
    Internal,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::InvalidSession => "invalid_session",
            CloseReason::SessionReplaced => "session_replaced",
            CloseReason::BackpressureExceeded => "backpressure_exceeded",
            CloseReason::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid_session" => Some(CloseReason::InvalidSession),
            "session_replaced" => Some(CloseReason::SessionReplaced),
            "backpressure_exceeded" => Some(CloseReason::BackpressureExceeded),
            "internal" => Some(CloseReason::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip_preserves_payload_verbatim() {
        let payload = r#"{"type":"client_hello","nested":{"a":[1,2,3]}}"#;
        let frame = RelayFrame::from_client("c1", payload).unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        let back: RelayFrame = serde_json::from_str(&json).unwrap();
        match back {
            RelayFrame::FromClient { client_id, frame } => {
                assert_eq!(client_id, "c1");
                assert_eq!(frame.get(), payload);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn close_reason_strings_round_trip() {
        for reason in [
            CloseReason::InvalidSession,
            CloseReason::SessionReplaced,
            CloseReason::BackpressureExceeded,
            CloseReason::Internal,
        ] {
            assert_eq!(CloseReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(CloseReason::parse("nope"), None);
    }

    #[test]
    fn register_and_join_tags() {
        let json = serde_json::to_string(&RelayFrame::Register {
            session_id: "s1".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"register\""));
        let json = serde_json::to_string(&RelayFrame::Join {
            session_id: "s1".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"join\""));
    }
}
