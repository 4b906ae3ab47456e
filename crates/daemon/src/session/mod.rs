//! The per-client session multiplexer.
//!
//! One `Session` per connected client (direct WebSocket or relay-demuxed).
//! The session owns its frame channel and pending-request set, dispatches
//! verbs to handlers under per-request cancellation scopes, and pumps
//! subscription fan-out subject to outbound back-pressure. Closing the
//! session cancels all in-flight work it owns — agent runs are owned by
//! the manager and survive.

pub mod handlers;
pub mod outbound;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use paseo_domain::agent::AgentFilter;
use paseo_domain::error::WireError;
use paseo_domain::event::AgentEvent;
use paseo_domain::{Error, Result};
use paseo_protocol::session::{ClientMessage, ServerMessage};
use paseo_protocol::types::AgentUpdate;
use paseo_term::TerminalFrame;

use crate::state::Daemon;
use outbound::Outbound;

/// Remembered request ids per session for duplicate rejection.
const SEEN_REQUEST_CAP: usize = 4096;

struct SeenRequests {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenRequests {
    fn new() -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record an id; `false` when it was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if !self.set.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        if self.order.len() > SEEN_REQUEST_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

struct AgentSubscription {
    manager_sub_id: u64,
    task: tokio::task::JoinHandle<()>,
}

struct TerminalSubscription {
    task: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct SessionSubs {
    agents: HashMap<String, AgentSubscription>,
    terminals: HashMap<String, TerminalSubscription>,
}

pub struct SessionInner {
    pub id: String,
    pub daemon: Daemon,
    pub outbound: Outbound,
    scope: CancellationToken,
    seen: Mutex<SeenRequests>,
    subs: Mutex<SessionSubs>,
}

/// Cheap handle shared with handler tasks.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl std::ops::Deref for Session {
    type Target = SessionInner;
    fn deref(&self) -> &SessionInner {
        &self.0
    }
}

impl Session {
    /// Create a session and its transport endpoints. The transport feeds
    /// raw frames into the returned sender and drains the returned
    /// receiver onto the wire, calling `outbound.mark_sent()` per frame.
    pub fn spawn(
        daemon: Daemon,
    ) -> (
        Session,
        mpsc::Sender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (outbound, outbound_rx) = Outbound::new();
        let session = Session(Arc::new(SessionInner {
            id: uuid::Uuid::new_v4().to_string(),
            daemon,
            outbound,
            scope: CancellationToken::new(),
            seen: Mutex::new(SeenRequests::new()),
            subs: Mutex::new(SessionSubs::default()),
        }));

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(256);
        let run_session = session.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    f = inbound_rx.recv() => f,
                    _ = run_session.scope.cancelled() => break,
                };
                match frame {
                    Some(text) => run_session.handle_frame(&text),
                    None => break,
                }
            }
            run_session.close();
        });

        (session, inbound_tx, outbound_rx)
    }

    pub fn scope(&self) -> CancellationToken {
        self.scope.clone()
    }

    /// Tear the session down: cancel in-flight handlers and subscription
    /// pumps. Idempotent.
    pub fn close(&self) {
        self.scope.cancel();
        let mut subs = self.subs.lock();
        for (_, sub) in subs.agents.drain() {
            sub.task.abort();
            self.daemon.agents.unsubscribe_events(sub.manager_sub_id);
        }
        for (_, sub) in subs.terminals.drain() {
            sub.task.abort();
        }
        tracing::debug!(session_id = %self.id, "session closed");
    }

    fn handle_frame(&self, text: &str) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "unparseable frame");
                // Frames with a recoverable request_id get a bad_request
                // reply instead of silence.
                if let Some(request_id) = extract_request_id(text) {
                    self.outbound.send(&ServerMessage::ErrorResponse {
                        request_id,
                        error: WireError::from(&Error::BadRequest(format!(
                            "unparseable message: {e}"
                        ))),
                    });
                }
                return;
            }
        };

        // Duplicate request ids are rejected, never silently ignored.
        if let Some(request_id) = msg.request_id() {
            if !self.seen.lock().insert(request_id) {
                self.outbound.send(&ServerMessage::ErrorResponse {
                    request_id: request_id.to_string(),
                    error: WireError::from(&Error::DuplicateRequestId(request_id.to_string())),
                });
                return;
            }
        }

        self.dispatch(msg);
    }

    fn dispatch(&self, msg: ClientMessage) {
        use ClientMessage::*;
        match msg {
            // Handshake and fire-and-forget verbs run inline.
            ClientHello { .. } => {
                self.outbound.send(&ServerMessage::ServerInfo {
                    server_id: self.daemon.identity.server_id.clone(),
                    version: self.daemon.version().to_string(),
                });
            }
            ClientHeartbeat {} => {
                self.outbound.send(&ServerMessage::HeartbeatAck {});
            }
            TerminalInput {
                terminal_id,
                data_b64,
            } => {
                let session = self.clone();
                tokio::spawn(async move {
                    handlers::terminals::input(&session, &terminal_id, &data_b64).await;
                });
            }
            RealtimeAudioChunk { .. } | DictationChunk { .. } => {
                // No voice provider configured; streamed audio is dropped.
                tracing::trace!(session_id = %self.id, "dropping audio chunk (no voice provider)");
            }

            // Everything else is request/response.
            other => {
                let Some(request_id) = other.request_id().map(str::to_string) else {
                    tracing::debug!(session_id = %self.id, "message without request id");
                    return;
                };
                let session = self.clone();
                let request_scope = self.scope.child_token();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        r = handlers::handle_request(&session, other) => r,
                        _ = request_scope.cancelled() => Err(Error::Cancelled),
                    };
                    let reply = match result {
                        Ok(reply) => reply,
                        Err(e) => {
                            if !matches!(e, Error::Cancelled) {
                                tracing::debug!(
                                    session_id = %session.id,
                                    request_id = %request_id,
                                    error = %e,
                                    "request failed"
                                );
                            }
                            ServerMessage::ErrorResponse {
                                request_id: request_id.clone(),
                                error: WireError::from(&e),
                            }
                        }
                    };
                    session.outbound.send(&reply);
                });
            }
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Register an agent-updates subscription: projection upserts/removals
    /// plus run events for matching agents, with initial-state replay.
    pub fn add_agent_subscription(&self, subscription_id: &str, filter: AgentFilter) -> Result<()> {
        {
            let subs = self.subs.lock();
            if subs.agents.contains_key(subscription_id) {
                return Err(Error::BadRequest(format!(
                    "subscription '{subscription_id}' already exists"
                )));
            }
        }

        let (manager_sub_id, mut rx) = self.daemon.agents.subscribe_events(true);
        let session = self.clone();
        let sub_id = subscription_id.to_string();
        let scope = self.scope.clone();

        let task = tokio::spawn(async move {
            let mut matched: HashSet<String> = HashSet::new();
            loop {
                let event = tokio::select! {
                    ev = rx.recv() => ev,
                    _ = scope.cancelled() => break,
                };
                let Some(event) = event else { break };

                let push = match &event {
                    AgentEvent::AgentState { agent } => {
                        if filter.matches(agent) {
                            matched.insert(agent.id.clone());
                            Some(ServerMessage::AgentUpdatePush {
                                subscription_id: sub_id.clone(),
                                update: AgentUpdate::Upsert {
                                    agent: agent.clone(),
                                },
                            })
                        } else if matched.remove(&agent.id) {
                            Some(ServerMessage::AgentUpdatePush {
                                subscription_id: sub_id.clone(),
                                update: AgentUpdate::Remove {
                                    agent_id: agent.id.clone(),
                                },
                            })
                        } else {
                            None
                        }
                    }
                    AgentEvent::AgentRemoved { agent_id } => {
                        if matched.remove(agent_id) {
                            Some(ServerMessage::AgentUpdatePush {
                                subscription_id: sub_id.clone(),
                                update: AgentUpdate::Remove {
                                    agent_id: agent_id.clone(),
                                },
                            })
                        } else {
                            None
                        }
                    }
                    other => {
                        if matched.contains(other.agent_id()) {
                            Some(ServerMessage::AgentEventPush {
                                subscription_id: sub_id.clone(),
                                event: other.clone(),
                            })
                        } else {
                            None
                        }
                    }
                };

                if let Some(push) = push {
                    if !session.outbound.send_push(&push, &scope).await {
                        break;
                    }
                }
            }
        });

        self.subs.lock().agents.insert(
            subscription_id.to_string(),
            AgentSubscription {
                manager_sub_id,
                task,
            },
        );
        Ok(())
    }

    pub fn remove_agent_subscription(&self, subscription_id: &str) -> bool {
        let removed = self.subs.lock().agents.remove(subscription_id);
        match removed {
            Some(sub) => {
                sub.task.abort();
                self.daemon.agents.unsubscribe_events(sub.manager_sub_id);
                true
            }
            None => false,
        }
    }

    /// Subscribe to a terminal's output; returns the scrollback so far.
    pub fn add_terminal_subscription(&self, terminal_id: &str) -> Result<Vec<u8>> {
        {
            let subs = self.subs.lock();
            if subs.terminals.contains_key(terminal_id) {
                return Err(Error::BadRequest(format!(
                    "already subscribed to terminal '{terminal_id}'"
                )));
            }
        }

        let (history, mut rx) = self
            .daemon
            .terminals
            .subscribe(terminal_id)
            .ok_or_else(|| Error::BadRequest(format!("no such terminal '{terminal_id}'")))?;

        let session = self.clone();
        let scope = self.scope.clone();
        let tid = terminal_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    f = rx.recv() => f,
                    _ = scope.cancelled() => break,
                };
                let push = match frame {
                    Ok(TerminalFrame::Output(bytes)) => ServerMessage::TerminalOutput {
                        terminal_id: tid.clone(),
                        data_b64: base64_encode(&bytes),
                    },
                    Ok(TerminalFrame::Exited(exit_code)) => {
                        let _ = session
                            .outbound
                            .send_push(
                                &ServerMessage::TerminalExited {
                                    terminal_id: tid.clone(),
                                    exit_code,
                                },
                                &scope,
                            )
                            .await;
                        break;
                    }
                    // Skipped frames under broadcast lag; keep streaming.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(terminal_id = %tid, skipped, "terminal subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if !session.outbound.send_push(&push, &scope).await {
                    break;
                }
            }
        });

        self.subs
            .lock()
            .terminals
            .insert(terminal_id.to_string(), TerminalSubscription { task });
        Ok(history)
    }

    pub fn remove_terminal_subscription(&self, terminal_id: &str) -> bool {
        match self.subs.lock().terminals.remove(terminal_id) {
            Some(sub) => {
                sub.task.abort();
                true
            }
            None => false,
        }
    }
}

pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(bytes)
}

pub(crate) fn base64_decode(text: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(text)
        .map_err(|e| Error::BadRequest(format!("invalid base64: {e}")))
}

/// Best-effort request id recovery from an unparseable frame.
fn extract_request_id(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value
        .get("request_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
