//! Dialing a single candidate and pumping its frame channel.
//!
//! Both candidate kinds end in the same shape: a typed outbound sender, a
//! typed inbound receiver, and a close token. Relay channels additionally
//! filter `to_client`/`broadcast` envelopes by the ephemeral client id
//! learned from the relay's `joined` frame.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use paseo_protocol::relay::{CloseReason, RelayFrame};
use paseo_protocol::session::{ClientMessage, ServerMessage};

/// How the winning candidate reaches the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Direct,
    Relay,
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The relay refused the attachment (no daemon registered, bad session).
    #[error("relay rejected attach: {0}")]
    RelayRejected(String),

    /// Authentication failure; not retried on the same candidate without
    /// backoff.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("all candidates failed")]
    AllCandidatesFailed,

    #[error("dial cancelled")]
    Cancelled,
}

impl DialError {
    pub fn is_auth(&self) -> bool {
        matches!(self, DialError::Auth(_))
    }
}

/// A live, handshaken channel to the daemon.
#[derive(Debug)]
pub struct DialedChannel {
    pub connection_id: String,
    pub kind: ChannelKind,
    /// The daemon's authoritative server id from `server_info`.
    pub server_id: String,
    pub server_version: String,
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<ServerMessage>,
    closed: CancellationToken,
}

impl DialedChannel {
    pub async fn send(&self, msg: ClientMessage) -> Result<(), DialError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| DialError::Connect("channel closed".into()))
    }

    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outbound.clone()
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }

    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

fn ws_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        format!("{}/ws", endpoint.trim_end_matches('/'))
    } else {
        format!("ws://{endpoint}/ws")
    }
}

/// Dial a `direct` candidate: connect, send `client_hello`, await
/// `server_info`.
pub async fn dial_direct(
    connection_id: &str,
    endpoint: &str,
    handshake_timeout: Duration,
) -> Result<DialedChannel, DialError> {
    let url = ws_url(endpoint);
    tracing::debug!(url = %url, connection_id = %connection_id, "dialing direct");

    let (ws, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| DialError::Connect(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let hello = serde_json::to_string(&ClientMessage::ClientHello { client_id: None })
        .map_err(|e| DialError::Handshake(e.to_string()))?;
    sink.send(Message::Text(hello))
        .await
        .map_err(|e| DialError::Connect(e.to_string()))?;

    let info = tokio::time::timeout(handshake_timeout, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ServerMessage::ServerInfo { server_id, version }) =
                    serde_json::from_str(&text)
                {
                    return Ok((server_id, version));
                }
            }
        }
        Err(DialError::Handshake("closed before server_info".into()))
    })
    .await
    .map_err(|_| DialError::HandshakeTimeout)??;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(256);
    let closed = CancellationToken::new();

    // Writer task.
    let writer_closed = closed.clone();
    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        writer_closed.cancel();
    });

    // Reader task.
    let reader_closed = closed.clone();
    tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&text) {
                        if inbound_tx.send(server_msg).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        reader_closed.cancel();
    });

    Ok(DialedChannel {
        connection_id: connection_id.to_string(),
        kind: ChannelKind::Direct,
        server_id: info.0,
        server_version: info.1,
        outbound: outbound_tx,
        inbound: inbound_rx,
        closed,
    })
}

/// Dial a `relay` candidate: join the daemon's relay session, learn our
/// ephemeral client id, then handshake through the pipe.
pub async fn dial_relay(
    connection_id: &str,
    relay_endpoint: &str,
    session_id: &str,
    handshake_timeout: Duration,
) -> Result<DialedChannel, DialError> {
    let url = ws_url(relay_endpoint);
    tracing::debug!(url = %url, session_id = %session_id, "dialing relay");

    let (ws, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| DialError::Connect(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let join = serde_json::to_string(&RelayFrame::Join {
        session_id: session_id.to_string(),
    })
    .map_err(|e| DialError::Handshake(e.to_string()))?;
    sink.send(Message::Text(join))
        .await
        .map_err(|e| DialError::Connect(e.to_string()))?;

    let handshake = async {
        // Phase 1: joined frame carrying our client id.
        let mut client_id = None;
        while client_id.is_none() {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(RelayFrame::Joined { client_id: cid }) =
                        serde_json::from_str(&text)
                    {
                        client_id = Some(cid);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(close_to_error(frame.map(|f| f.reason.into_owned())));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(DialError::Connect(e.to_string())),
                None => return Err(DialError::RelayRejected("closed during join".into())),
            }
        }
        let client_id = client_id.unwrap_or_default();

        // Phase 2: client_hello through the pipe, server_info back.
        let hello = serde_json::to_string(&ClientMessage::ClientHello {
            client_id: Some(client_id.clone()),
        })
        .map_err(|e| DialError::Handshake(e.to_string()))?;
        sink.send(Message::Text(hello))
            .await
            .map_err(|e| DialError::Connect(e.to_string()))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(server_msg) = unwrap_relay_frame(&text, &client_id) {
                        if let ServerMessage::ServerInfo { server_id, version } = server_msg {
                            return Ok((client_id, server_id, version));
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(close_to_error(frame.map(|f| f.reason.into_owned())));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(DialError::Connect(e.to_string())),
                None => {
                    return Err(DialError::Handshake("closed before server_info".into()))
                }
            }
        }
    };

    let (client_id, server_id, version) = tokio::time::timeout(handshake_timeout, handshake)
        .await
        .map_err(|_| DialError::HandshakeTimeout)??;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(256);
    let closed = CancellationToken::new();

    // Writer: raw frames; the relay attaches our client id on the way in.
    let writer_closed = closed.clone();
    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        writer_closed.cancel();
    });

    // Reader: unwrap envelopes addressed to us (or broadcast).
    let reader_closed = closed.clone();
    let our_id = client_id;
    tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(server_msg) = unwrap_relay_frame(&text, &our_id) {
                        if inbound_tx.send(server_msg).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        reader_closed.cancel();
    });

    Ok(DialedChannel {
        connection_id: connection_id.to_string(),
        kind: ChannelKind::Relay,
        server_id,
        server_version: version,
        outbound: outbound_tx,
        inbound: inbound_rx,
        closed,
    })
}

/// Unwrap a daemon-authored envelope. Frames addressed to other clients are
/// dropped; broadcasts pass through.
fn unwrap_relay_frame(text: &str, our_client_id: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<RelayFrame>(text) {
        Ok(RelayFrame::ToClient { client_id, frame }) if client_id == our_client_id => {
            serde_json::from_str(frame.get()).ok()
        }
        Ok(RelayFrame::Broadcast { frame }) => serde_json::from_str(frame.get()).ok(),
        _ => None,
    }
}

fn close_to_error(reason: Option<String>) -> DialError {
    let reason = reason.unwrap_or_default();
    if let Some(parsed) = CloseReason::parse(&reason) {
        return DialError::RelayRejected(parsed.as_str().to_string());
    }
    let lowered = reason.to_ascii_lowercase();
    if lowered.contains("auth") || lowered.contains("unauthorized") {
        DialError::Auth(reason)
    } else {
        DialError::RelayRejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_forms() {
        assert_eq!(ws_url("10.0.0.1:7423"), "ws://10.0.0.1:7423/ws");
        assert_eq!(ws_url("wss://relay.example.com"), "wss://relay.example.com/ws");
    }

    #[test]
    fn unwrap_filters_by_client_id() {
        let info = serde_json::to_string(&ServerMessage::ServerInfo {
            server_id: "srv".into(),
            version: "0.1.0".into(),
        })
        .unwrap();

        let ours = serde_json::to_string(&RelayFrame::to_client("me", &info).unwrap()).unwrap();
        assert!(unwrap_relay_frame(&ours, "me").is_some());
        assert!(unwrap_relay_frame(&ours, "other").is_none());

        let broadcast = serde_json::to_string(&RelayFrame::Broadcast {
            frame: serde_json::value::RawValue::from_string(info).unwrap(),
        })
        .unwrap();
        assert!(unwrap_relay_frame(&broadcast, "anyone").is_some());
    }

    #[test]
    fn close_reason_mapping() {
        assert!(matches!(
            close_to_error(Some("invalid_session".into())),
            DialError::RelayRejected(_)
        ));
        assert!(close_to_error(Some("unauthorized key".into())).is_auth());
        assert!(matches!(
            close_to_error(None),
            DialError::RelayRejected(_)
        ));
    }
}
