//! Session outbound queue with a high-water mark.
//!
//! Request replies always enqueue. Push frames (subscription fan-out,
//! terminal output) pause above the high-water mark and resume once the
//! writer drains below the low-water mark — replies keep flowing while a
//! slow client back-pressures its subscriptions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use paseo_protocol::session::ServerMessage;

pub const HIGH_WATER: usize = 512;

#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
    queued: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Outbound {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                queued: Arc::new(AtomicUsize::new(0)),
                drained: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn enqueue(&self, msg: &ServerMessage) -> bool {
        let json = match serde_json::to_string(msg) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize server message");
                return false;
            }
        };
        if self.tx.send(json).is_ok() {
            self.queued.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// Enqueue a reply or handshake frame. Never pauses.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        self.enqueue(msg)
    }

    /// Enqueue a push frame, waiting while the queue sits above the
    /// high-water mark. Returns `false` when the session closed first.
    pub async fn send_push(&self, msg: &ServerMessage, scope: &CancellationToken) -> bool {
        loop {
            if self.queued.load(Ordering::Acquire) < HIGH_WATER {
                break;
            }
            // Register before re-checking so a concurrent drain cannot slip
            // between the check and the wait.
            let notified = self.drained.notified();
            if self.queued.load(Ordering::Acquire) < HIGH_WATER {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = scope.cancelled() => return false,
            }
        }
        self.enqueue(msg)
    }

    /// Called by the transport writer after each frame hits the wire.
    pub fn mark_sent(&self) {
        let before = self.queued.fetch_sub(1, Ordering::AcqRel);
        if before.saturating_sub(1) < HIGH_WATER {
            self.drained.notify_waiters();
        }
    }
}
