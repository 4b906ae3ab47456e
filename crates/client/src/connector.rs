//! The reconnecting connector: races candidates, maintains one logical
//! channel, and rekeys the host profile when the daemon reports a different
//! authoritative server id.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use paseo_protocol::session::{ClientMessage, ServerMessage};

use crate::backoff::ReconnectBackoff;
use crate::dialer::{race, ActiveConnection, DialOptions};
use crate::profile::ProfileStore;

/// Published connection state.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Offline,
    Online(ActiveConnection),
}

pub struct Connector {
    store: Arc<ProfileStore>,
    opts: DialOptions,
    backoff: ReconnectBackoff,
}

impl Connector {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self {
            store,
            opts: DialOptions::default(),
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn with_options(mut self, opts: DialOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maintain a connection to the host identified by `server_id` until
    /// `shutdown`. Inbound frames flow to `inbound_tx`; outbound frames are
    /// taken from `outbound_rx` while online (delivery is at-most-once per
    /// live connection).
    pub async fn run(
        &self,
        mut server_id: String,
        shutdown: CancellationToken,
        status_tx: watch::Sender<ConnectionStatus>,
        inbound_tx: mpsc::Sender<ServerMessage>,
        mut outbound_rx: mpsc::Receiver<ClientMessage>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let Some(profile) = self.store.get(&server_id) else {
                tracing::warn!(server_id = %server_id, "host profile removed, stopping");
                status_tx.send_replace(ConnectionStatus::Offline);
                return;
            };

            let raced = tokio::select! {
                r = race(&profile, &self.opts) => r,
                _ = shutdown.cancelled() => return,
            };

            match raced {
                Ok(mut channel) => {
                    // The daemon's id is authoritative; a mismatch rekeys
                    // the stored profile and everything keyed by it.
                    if channel.server_id != server_id {
                        match self.store.rekey(&server_id, &channel.server_id) {
                            Ok(true) => {
                                tracing::info!(
                                    old = %server_id,
                                    new = %channel.server_id,
                                    "rekeyed host profile from server_info"
                                );
                            }
                            Ok(false) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "rekey failed");
                            }
                        }
                        server_id = channel.server_id.clone();
                    }

                    status_tx.send_replace(ConnectionStatus::Online(ActiveConnection {
                        connection_id: channel.connection_id.clone(),
                        kind: channel.kind,
                        server_id: channel.server_id.clone(),
                    }));
                    // A completed handshake resets the backoff.
                    attempt = 0;

                    let closed = channel.closed();
                    loop {
                        tokio::select! {
                            inbound = channel.recv() => {
                                match inbound {
                                    Some(msg) => {
                                        if inbound_tx.send(msg).await.is_err() {
                                            return;
                                        }
                                    }
                                    None => break,
                                }
                            }
                            outbound = outbound_rx.recv() => {
                                match outbound {
                                    Some(msg) => {
                                        if channel.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => return,
                                }
                            }
                            _ = closed.cancelled() => break,
                            _ = shutdown.cancelled() => return,
                        }
                    }

                    status_tx.send_replace(ConnectionStatus::Offline);
                    tracing::info!(server_id = %server_id, "connection lost");
                }
                Err(e) => {
                    if e.is_auth() {
                        tracing::error!(
                            server_id = %server_id,
                            error = %e,
                            "authentication failed; retrying after backoff"
                        );
                    } else {
                        tracing::debug!(
                            server_id = %server_id,
                            attempt,
                            error = %e,
                            "dial race failed"
                        );
                    }
                    status_tx.send_replace(ConnectionStatus::Offline);
                }
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }
}
