//! HTTP/WebSocket surface of the daemon.
//!
//! `GET /ws` upgrades a direct client connection into a session; `GET
//! /download/:token` is the download side-channel for single-use tokens.
//! CORS origins come from `PASEO_CORS_ORIGINS`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::session::Session;
use crate::state::Daemon;

/// Concurrent in-flight HTTP requests (WS upgrades included).
const MAX_CONCURRENT_REQUESTS: usize = 256;

pub fn router(daemon: Daemon) -> Router {
    let cors = build_cors_layer(&daemon.config.cors_origins);
    Router::new()
        .route("/ws", get(client_ws))
        .route("/download/:token", get(download))
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(daemon)
}

/// Bind and serve until `shutdown`. A bind failure is fatal.
pub async fn serve(daemon: Daemon, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = daemon.config.listen.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("binding to {addr}: {e}"))?;

    tracing::info!(addr = %addr, "paseod listening");
    serve_on(daemon, listener, shutdown).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(
    daemon: Daemon,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(daemon);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn client_ws(ws: WebSocketUpgrade, State(daemon): State<Daemon>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, daemon))
}

async fn handle_socket(socket: WebSocket, daemon: Daemon) {
    let (mut sink, mut stream) = socket.split();
    let (session, inbound_tx, mut outbound_rx) = Session::spawn(daemon);
    tracing::info!(session_id = %session.id, "client connected");

    // Writer: one JSON message per text frame.
    let writer_session = session.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let ok = sink.send(Message::Text(frame)).await.is_ok();
            writer_session.outbound.mark_sent();
            if !ok {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                if inbound_tx.send(text).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.close();
    writer.abort();
    tracing::info!(session_id = %session.id, "client disconnected");
}

async fn download(
    Path(token): Path<String>,
    State(daemon): State<Daemon>,
) -> impl IntoResponse {
    let Some(path) = daemon.downloads.redeem(&token) else {
        return (StatusCode::NOT_FOUND, "unknown or expired token").into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "download".into());
            (
                [
                    ("content-type", "application/octet-stream".to_string()),
                    (
                        "content-disposition",
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "download read failed");
            (StatusCode::NOT_FOUND, "file unavailable").into_response()
        }
    }
}

/// CORS from configured origins. Empty config allows none; a literal `*`
/// allows all.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(hv) => Some(hv),
                    Err(_) => {
                        tracing::warn!(origin = %o, "invalid CORS origin, skipping");
                        None
                    }
                })
                .collect::<Vec<_>>(),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}
