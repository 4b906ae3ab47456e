//! The daemon side of the relay.
//!
//! Connects out to the configured relay, registers under the daemon's
//! server id, and demultiplexes `from_client` envelopes into one session
//! per ephemeral client id. Outbound session frames are wrapped in
//! `to_client` envelopes the relay broadcasts opaquely. Reconnects with
//! jittered exponential backoff; relay-side sessions die with the uplink.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use paseo_protocol::relay::RelayFrame;

use crate::session::Session;
use crate::state::Daemon;

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Maintain the relay registration until `shutdown`. No-op when no relay
/// endpoint is configured.
pub async fn run_uplink(daemon: Daemon, shutdown: CancellationToken) {
    let Some(relay) = daemon.config.relay_endpoint.clone() else {
        return;
    };
    let url = if relay.starts_with("ws://") || relay.starts_with("wss://") {
        format!("{}/ws", relay.trim_end_matches('/'))
    } else {
        format!("ws://{relay}/ws")
    };

    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws, _response)) => {
                tracing::info!(relay = %relay, "relay uplink connected");
                attempt = 0;
                run_registered(&daemon, ws, &shutdown).await;
                tracing::warn!(relay = %relay, "relay uplink lost");
            }
            Err(e) => {
                tracing::debug!(relay = %relay, attempt, error = %e, "relay connect failed");
            }
        }

        let exp = 2u64.saturating_pow(attempt.min(16));
        let delay = BACKOFF_INITIAL
            .saturating_mul(exp as u32)
            .min(BACKOFF_MAX);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

struct ClientPipe {
    inbound_tx: mpsc::Sender<String>,
    session: Session,
    forward: tokio::task::JoinHandle<()>,
}

async fn run_registered(
    daemon: &Daemon,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    shutdown: &CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();

    let register = match serde_json::to_string(&RelayFrame::Register {
        session_id: daemon.identity.server_id.clone(),
    }) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize register frame");
            return;
        }
    };
    if sink.send(Message::Text(register)).await.is_err() {
        return;
    }

    // All per-client envelopes funnel through one writer.
    let (uplink_tx, mut uplink_rx) = mpsc::channel::<String>(1024);
    let writer = tokio::spawn(async move {
        while let Some(frame) = uplink_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut clients: HashMap<String, ClientPipe> = HashMap::new();

    loop {
        let msg = tokio::select! {
            m = stream.next() => m,
            _ = shutdown.cancelled() => break,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "uplink read error");
                break;
            }
        };

        let frame = match serde_json::from_str::<RelayFrame>(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable relay frame");
                continue;
            }
        };
        let RelayFrame::FromClient { client_id, frame } = frame else {
            continue;
        };

        let delivered = {
            let pipe = clients.entry(client_id.clone()).or_insert_with(|| {
                spawn_client_pipe(daemon.clone(), client_id.clone(), uplink_tx.clone())
            });
            pipe.inbound_tx.send(frame.get().to_string()).await.is_ok()
        };
        if !delivered {
            // Session ended; rebuild on the client's next frame.
            if let Some(dead) = clients.remove(&client_id) {
                dead.forward.abort();
                dead.session.close();
            }
        }
    }

    for (_, pipe) in clients.drain() {
        pipe.forward.abort();
        pipe.session.close();
    }
    writer.abort();
}

fn spawn_client_pipe(
    daemon: Daemon,
    client_id: String,
    uplink_tx: mpsc::Sender<String>,
) -> ClientPipe {
    let (session, inbound_tx, mut outbound_rx) = Session::spawn(daemon);
    tracing::info!(
        session_id = %session.id,
        client_id = %client_id,
        "relay client session opened"
    );

    let forward_session = session.clone();
    let forward = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let wrapped = match RelayFrame::to_client(&client_id, &frame) {
                Ok(w) => w,
                Err(e) => {
                    tracing::error!(error = %e, "failed to wrap outbound frame");
                    forward_session.outbound.mark_sent();
                    continue;
                }
            };
            let json = match serde_json::to_string(&wrapped) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize envelope");
                    forward_session.outbound.mark_sent();
                    continue;
                }
            };
            let sent = uplink_tx.send(json).await.is_ok();
            forward_session.outbound.mark_sent();
            if !sent {
                break;
            }
        }
    });

    ClientPipe {
        inbound_tx,
        session,
        forward,
    }
}
