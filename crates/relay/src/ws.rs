//! WebSocket endpoint for relay attachments.
//!
//! Flow:
//! 1. Peer connects to `/ws` and sends `register` (daemon) or `join`
//!    (client) as its first text frame.
//! 2. Clients receive `joined { client_id }`.
//! 3. Frames forward opaquely until a side disconnects or is closed with an
//!    application close reason.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use paseo_protocol::relay::{CloseReason, RelayFrame};

use crate::state::{RelayState, Side};

const ATTACH_TIMEOUT: Duration = Duration::from_secs(10);
const GC_INTERVAL: Duration = Duration::from_secs(15);

/// Build the relay router and start the GC sweeper.
pub fn router(state: Arc<RelayState>) -> Router {
    let gc_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GC_INTERVAL);
        loop {
            interval.tick().await;
            gc_state.sweep_idle();
        }
    });

    Router::new()
        .route("/ws", get(relay_ws))
        .with_state(state)
}

async fn relay_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sink, mut stream) = socket.split();

    // First frame decides which side this peer is.
    let attach = tokio::time::timeout(ATTACH_TIMEOUT, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                return serde_json::from_str::<RelayFrame>(&text).ok();
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    match attach {
        Some(RelayFrame::Register { session_id }) => {
            run_daemon_side(state, session_id, sink, stream).await;
        }
        Some(RelayFrame::Join { session_id }) => {
            run_client_side(state, session_id, sink, stream).await;
        }
        _ => {
            tracing::debug!("peer did not attach, closing");
            close_with(&mut sink, Some(CloseReason::InvalidSession)).await;
        }
    }
}

async fn run_daemon_side(
    state: Arc<RelayState>,
    session_id: String,
    mut sink: SplitSink<WebSocket, Message>,
    mut stream: impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
) {
    let (side, mut frames_rx, mut close_rx) = Side::new(state.config().high_water);
    let side_id = side.side_id.clone();
    let session = state.register_daemon(&session_id, side);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.daemon_frame(&session, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            outbound = frames_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            reason = close_rx.recv() => {
                close_with(&mut sink, reason.flatten()).await;
                break;
            }
        }
    }

    state.remove_daemon(&session_id, &side_id);
}

async fn run_client_side(
    state: Arc<RelayState>,
    session_id: String,
    mut sink: SplitSink<WebSocket, Message>,
    mut stream: impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
) {
    let (side, mut frames_rx, mut close_rx) = Side::new(state.config().high_water);
    let (session, client_id) = match state.join_client(&session_id, side) {
        Ok(joined) => joined,
        Err(reason) => {
            close_with(&mut sink, Some(reason)).await;
            return;
        }
    };

    let joined = RelayFrame::Joined {
        client_id: client_id.clone(),
    };
    let joined_json = match serde_json::to_string(&joined) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize joined frame");
            state.remove_client(&session_id, &client_id);
            close_with(&mut sink, Some(CloseReason::Internal)).await;
            return;
        }
    };
    if sink.send(Message::Text(joined_json)).await.is_err() {
        state.remove_client(&session_id, &client_id);
        return;
    }

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.client_frame(&session, &client_id, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            outbound = frames_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            reason = close_rx.recv() => {
                close_with(&mut sink, reason.flatten()).await;
                break;
            }
        }
    }

    state.remove_client(&session_id, &client_id);
}

async fn close_with(sink: &mut SplitSink<WebSocket, Message>, reason: Option<CloseReason>) {
    let frame = CloseFrame {
        code: 1000,
        reason: reason.map(|r| r.as_str().into()).unwrap_or_default(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}
