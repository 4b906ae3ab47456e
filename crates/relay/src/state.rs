//! Relay session registry and forwarding rules.
//!
//! Each named session has one daemon side and zero-or-more client sides.
//! Frames are opaque past the attach handshake: daemon frames broadcast to
//! every client side; client frames are wrapped in `from_client` toward the
//! daemon. Slow sides are closed with `backpressure_exceeded` instead of
//! buffering without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use paseo_protocol::relay::{CloseReason, RelayFrame};

/// Per-side outbound buffer capacity (the high-water mark).
pub const DEFAULT_HIGH_WATER: usize = 256;

/// Sessions idle beyond this with no attached clients are garbage-collected.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub high_water: usize,
    pub idle_ttl: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            high_water: DEFAULT_HIGH_WATER,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

/// One attached socket: an outbound frame queue plus a close signal.
/// `None` close reason means a normal close.
#[derive(Clone)]
pub struct Side {
    pub side_id: String,
    frames: mpsc::Sender<String>,
    close: mpsc::Sender<Option<CloseReason>>,
}

impl Side {
    pub fn new(
        high_water: usize,
    ) -> (
        Self,
        mpsc::Receiver<String>,
        mpsc::Receiver<Option<CloseReason>>,
    ) {
        let (frames_tx, frames_rx) = mpsc::channel(high_water);
        let (close_tx, close_rx) = mpsc::channel(1);
        (
            Self {
                side_id: uuid::Uuid::new_v4().to_string(),
                frames: frames_tx,
                close: close_tx,
            },
            frames_rx,
            close_rx,
        )
    }

    /// Queue a frame. `false` means the side's buffer is full.
    fn try_send(&self, frame: String) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            // Receiver gone: the socket task is already winding down.
            Err(mpsc::error::TrySendError::Closed(_)) => true,
        }
    }

    pub fn close(&self, reason: Option<CloseReason>) {
        let _ = self.close.try_send(reason);
    }
}

struct SessionSides {
    daemon: Option<Side>,
    clients: HashMap<String, Side>,
}

/// A named forwarding pipe.
pub struct RelaySession {
    pub session_id: String,
    sides: Mutex<SessionSides>,
    last_activity: Mutex<Instant>,
}

impl RelaySession {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            sides: Mutex::new(SessionSides {
                daemon: None,
                clients: HashMap::new(),
            }),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn client_count(&self) -> usize {
        self.sides.lock().clients.len()
    }

    pub fn has_daemon(&self) -> bool {
        self.sides.lock().daemon.is_some()
    }
}

/// The relay's shared state.
pub struct RelayState {
    sessions: RwLock<HashMap<String, Arc<RelaySession>>>,
    config: RelayConfig,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RelaySession>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Register the daemon side of a session, creating the session if
    /// needed. Any previously registered daemon is closed with
    /// `session_replaced`.
    pub fn register_daemon(&self, session_id: &str, side: Side) -> Arc<RelaySession> {
        let session = {
            let mut sessions = self.sessions.write();
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(RelaySession::new(session_id.to_string())))
                .clone()
        };

        let previous = {
            let mut sides = session.sides.lock();
            sides.daemon.replace(side)
        };
        session.touch();

        if let Some(old) = previous {
            tracing::info!(session_id = %session_id, "daemon replaced");
            old.close(Some(CloseReason::SessionReplaced));
        } else {
            tracing::info!(session_id = %session_id, "daemon registered");
        }
        session
    }

    /// Attach a client side. Fails with `invalid_session` when no daemon is
    /// registered under the id.
    pub fn join_client(
        &self,
        session_id: &str,
        side: Side,
    ) -> Result<(Arc<RelaySession>, String), CloseReason> {
        let session = self
            .get(session_id)
            .ok_or(CloseReason::InvalidSession)?;

        let client_id = uuid::Uuid::new_v4().to_string();
        {
            let mut sides = session.sides.lock();
            if sides.daemon.is_none() {
                return Err(CloseReason::InvalidSession);
            }
            sides.clients.insert(client_id.clone(), side);
        }
        session.touch();
        tracing::info!(session_id = %session_id, client_id = %client_id, "client joined");
        Ok((session, client_id))
    }

    /// Forward a daemon frame: broadcast verbatim to every client side.
    /// Clients whose buffers are full are closed with
    /// `backpressure_exceeded`.
    pub fn daemon_frame(&self, session: &RelaySession, frame: &str) {
        session.touch();
        let mut slow = Vec::new();
        {
            let sides = session.sides.lock();
            for (client_id, side) in &sides.clients {
                if !side.try_send(frame.to_string()) {
                    slow.push(client_id.clone());
                }
            }
        }
        for client_id in slow {
            let removed = session.sides.lock().clients.remove(&client_id);
            if let Some(side) = removed {
                tracing::warn!(
                    session_id = %session.session_id,
                    client_id = %client_id,
                    "client too slow, closing"
                );
                side.close(Some(CloseReason::BackpressureExceeded));
            }
        }
    }

    /// Forward a client frame to the daemon, wrapped with the client's
    /// ephemeral id. A full daemon buffer closes the daemon side.
    pub fn client_frame(&self, session: &RelaySession, client_id: &str, frame: &str) {
        session.touch();
        let wrapped = match RelayFrame::from_client(client_id, frame) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    client_id = %client_id,
                    error = %e,
                    "dropping unparseable client frame"
                );
                return;
            }
        };
        let json = match serde_json::to_string(&wrapped) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize relay envelope");
                return;
            }
        };

        let slow_daemon = {
            let sides = session.sides.lock();
            match &sides.daemon {
                Some(daemon) => !daemon.try_send(json),
                None => false,
            }
        };
        if slow_daemon {
            let daemon = session.sides.lock().daemon.take();
            if let Some(side) = daemon {
                tracing::warn!(
                    session_id = %session.session_id,
                    "daemon too slow, closing"
                );
                side.close(Some(CloseReason::BackpressureExceeded));
            }
        }
    }

    /// Detach a daemon side, only if it is still the registered one.
    pub fn remove_daemon(&self, session_id: &str, side_id: &str) {
        if let Some(session) = self.get(session_id) {
            let mut sides = session.sides.lock();
            if sides
                .daemon
                .as_ref()
                .is_some_and(|d| d.side_id == side_id)
            {
                sides.daemon = None;
                session.touch();
                tracing::info!(session_id = %session_id, "daemon detached");
            }
        }
    }

    pub fn remove_client(&self, session_id: &str, client_id: &str) {
        if let Some(session) = self.get(session_id) {
            if session.sides.lock().clients.remove(client_id).is_some() {
                session.touch();
                tracing::info!(
                    session_id = %session_id,
                    client_id = %client_id,
                    "client detached"
                );
            }
        }
    }

    /// Drop sessions idle beyond the TTL. Daemonless sessions take their
    /// remaining clients down with `invalid_session`.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.idle_ttl;

        let expired: Vec<Arc<RelaySession>> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| {
                    let idle = now.duration_since(*s.last_activity.lock());
                    if idle < ttl {
                        return false;
                    }
                    let sides = s.sides.lock();
                    sides.daemon.is_none() || sides.clients.is_empty()
                })
                .cloned()
                .collect()
        };

        for session in &expired {
            self.sessions.write().remove(&session.session_id);
            let mut sides = session.sides.lock();
            if let Some(daemon) = sides.daemon.take() {
                daemon.close(None);
            }
            for (_, client) in sides.clients.drain() {
                client.close(Some(CloseReason::InvalidSession));
            }
            tracing::info!(session_id = %session.session_id, "session garbage-collected");
        }
        expired.len()
    }
}
