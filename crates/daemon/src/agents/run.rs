//! The per-agent run loop.
//!
//! Exactly one run is active per agent. A new prompt on a running agent
//! requests cancel, awaits the previous run's drain, records the new user
//! message, starts the new run, and waits for start confirmation. Within a
//! run, subscribers observe provider events in arrival order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use paseo_domain::agent::{AgentLifecycle, AttentionReason};
use paseo_domain::event::{AgentEvent, BoxStream, ProviderEvent, RunTerminal};
use paseo_domain::timeline::{TimelineItem, ToolCallStatus};
use paseo_domain::{Error, Result};
use paseo_providers::AgentPrompt;

use super::manager::{ActiveRun, AgentManager, ManagedAgent};
use super::permissions::PendingPermission;

/// How long `send_agent_message` waits for the provider to confirm the run
/// has started.
const START_CONFIRM_TIMEOUT: Duration = Duration::from_secs(15);
/// How long an implicit cancel waits for the previous run to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Persist after this many streamed events.
const PERSIST_EVERY: usize = 10;

pub(crate) async fn start_run(
    manager: &Arc<AgentManager>,
    agent: Arc<ManagedAgent>,
    prompt: AgentPrompt,
) -> Result<String> {
    // One transition at a time per agent; a second prompt arriving during
    // this handoff queues behind the gate.
    let _gate = agent.run_gate.lock().await;

    let session = agent
        .session()
        .ok_or_else(|| Error::BadRequest("agent has no live session".into()))?;

    // Implicit cancel of the previous run.
    if let Some(previous) = agent.active_run() {
        tracing::debug!(agent_id = %agent.id, run_id = %previous.run_id, "implicit cancel");
        let _ = session.cancel().await;
        previous.cancel.cancel();

        let mut done = previous.done.clone();
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while !*done.borrow() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            return Err(Error::Timeout("previous run did not drain".into()));
        }
    }

    // Record the new user message before invoking the provider.
    {
        let mut state = agent.state.lock();
        state.record.timeline.push(TimelineItem::UserMessage {
            id: uuid::Uuid::new_v4().to_string(),
            text: prompt.text.clone(),
            images: prompt.images.clone(),
            at: Utc::now(),
        });
        state.record.updated_at = Utc::now();
    }
    manager.persist_async(&agent);

    // Start the run; the provider confirms by returning its event stream.
    let stream = tokio::time::timeout(START_CONFIRM_TIMEOUT, session.stream(prompt))
        .await
        .map_err(|_| Error::Timeout("provider did not confirm run start".into()))??;

    let run_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = watch::channel(false);
    {
        let mut state = agent.state.lock();
        state.record.lifecycle = AgentLifecycle::Running;
        state.record.updated_at = Utc::now();
        state.run = Some(ActiveRun {
            run_id: run_id.clone(),
            cancel: cancel.clone(),
            done: done_rx,
        });
    }
    drop(_gate);

    manager.fanout.publish(&AgentEvent::RunStarted {
        agent_id: agent.id.clone(),
        run_id: run_id.clone(),
    });
    manager.publish_state(&agent);

    tokio::spawn(drive_run(
        manager.clone(),
        agent,
        run_id.clone(),
        stream,
        cancel,
        done_tx,
    ));
    Ok(run_id)
}

async fn drive_run(
    manager: Arc<AgentManager>,
    agent: Arc<ManagedAgent>,
    run_id: String,
    mut stream: BoxStream<'static, ProviderEvent>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
) {
    let mut ctx = RunCtx {
        manager: &manager,
        agent: &agent,
        run_id: &run_id,
        current_text_id: None,
        events_since_persist: 0,
    };

    let terminal = loop {
        let next = tokio::select! {
            ev = stream.next() => ev,
            _ = cancel.cancelled() => {
                // Drain events the provider produced before the cancel
                // landed; a buffered finish means the run actually ended.
                let mut terminal = RunTerminal::Cancelled;
                loop {
                    match tokio::time::timeout(Duration::from_millis(100), stream.next()).await {
                        Ok(Some(ev)) => {
                            if let Some(t) = ctx.apply(ev) {
                                terminal = t;
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                break terminal;
            }
        };

        match next {
            Some(ev) => {
                if let Some(terminal) = ctx.apply(ev) {
                    break terminal;
                }
            }
            // Stream ended without a finish event.
            None => {
                break if cancel.is_cancelled() {
                    RunTerminal::Cancelled
                } else {
                    RunTerminal::Idle
                };
            }
        }
    };

    finalize_run(&manager, &agent, &run_id, terminal);
    done_tx.send_replace(true);
}

struct RunCtx<'a> {
    manager: &'a Arc<AgentManager>,
    agent: &'a Arc<ManagedAgent>,
    run_id: &'a str,
    current_text_id: Option<String>,
    events_since_persist: usize,
}

impl RunCtx<'_> {
    /// Apply one provider event: fan out, mutate the timeline, track
    /// permissions. Returns the terminal state when the run is over.
    fn apply(&mut self, event: ProviderEvent) -> Option<RunTerminal> {
        self.manager.fanout.publish(&AgentEvent::RunEvent {
            agent_id: self.agent.id.clone(),
            run_id: self.run_id.to_string(),
            event: event.clone(),
        });

        let terminal = match event {
            ProviderEvent::TextDelta { text } => {
                self.append_text(&text);
                None
            }
            ProviderEvent::ToolCall {
                call_id,
                name,
                input,
            } => {
                self.current_text_id = None;
                let mut state = self.agent.state.lock();
                state.record.timeline.push(TimelineItem::ToolCall {
                    call_id,
                    name,
                    status: ToolCallStatus::Running,
                    input,
                    output: None,
                    error: None,
                    at: Utc::now(),
                });
                state.record.updated_at = Utc::now();
                None
            }
            ProviderEvent::ToolResult {
                call_id,
                output,
                error,
            } => {
                let status = if error.is_some() {
                    ToolCallStatus::Failed
                } else {
                    ToolCallStatus::Completed
                };
                let mut state = self.agent.state.lock();
                if !state
                    .record
                    .timeline
                    .update_tool_call(&call_id, status, output, error)
                {
                    tracing::warn!(
                        agent_id = %self.agent.id,
                        call_id = %call_id,
                        "tool result for unknown or finalized call"
                    );
                }
                state.record.updated_at = Utc::now();
                None
            }
            ProviderEvent::PermissionRequest {
                request_id,
                tool_name,
                action,
            } => {
                self.current_text_id = None;
                {
                    let mut state = self.agent.state.lock();
                    state.record.timeline.push(TimelineItem::PermissionRequest {
                        request_id: request_id.clone(),
                        tool_name: tool_name.clone(),
                        action: action.clone(),
                        outcome: None,
                        at: Utc::now(),
                    });
                    state.record.attention = Some(AttentionReason::Permission);
                    state.record.updated_at = Utc::now();
                }
                self.manager.permissions.insert(PendingPermission {
                    agent_id: self.agent.id.clone(),
                    request_id,
                    tool_name,
                    action,
                    created_at: Utc::now(),
                });
                self.manager.publish_state(self.agent);
                None
            }
            ProviderEvent::Finish { .. } => Some(RunTerminal::Idle),
            ProviderEvent::Error { message } => {
                let mut state = self.agent.state.lock();
                state.record.last_error = Some(message.clone());
                state.record.timeline.push(TimelineItem::System {
                    id: uuid::Uuid::new_v4().to_string(),
                    text: format!("run error: {message}"),
                    at: Utc::now(),
                });
                state.record.updated_at = Utc::now();
                Some(RunTerminal::Error)
            }
        };

        self.events_since_persist += 1;
        if self.events_since_persist >= PERSIST_EVERY {
            self.events_since_persist = 0;
            self.manager.persist_async(self.agent);
        }
        terminal
    }

    fn append_text(&mut self, text: &str) {
        let mut state = self.agent.state.lock();
        let merged = match (&self.current_text_id, state.record.timeline.items.last_mut()) {
            (Some(current), Some(TimelineItem::AssistantText { id, text: buf, .. }))
                if id == current =>
            {
                buf.push_str(text);
                true
            }
            _ => false,
        };
        if !merged {
            let id = uuid::Uuid::new_v4().to_string();
            state.record.timeline.push(TimelineItem::AssistantText {
                id: id.clone(),
                text: text.to_string(),
                at: Utc::now(),
            });
            self.current_text_id = Some(id);
        }
        state.record.updated_at = Utc::now();
    }
}

fn finalize_run(
    manager: &Arc<AgentManager>,
    agent: &Arc<ManagedAgent>,
    run_id: &str,
    terminal: RunTerminal,
) {
    {
        let mut state = agent.state.lock();
        if terminal == RunTerminal::Cancelled {
            let failed = state.record.timeline.fail_open_tool_calls("cancelled");
            if !failed.is_empty() {
                tracing::debug!(
                    agent_id = %agent.id,
                    cancelled_calls = failed.len(),
                    "finalized in-flight tool calls"
                );
            }
        }
        state.record.lifecycle = match terminal {
            RunTerminal::Error => AgentLifecycle::Error,
            RunTerminal::Idle | RunTerminal::Cancelled => AgentLifecycle::Idle,
        };
        if terminal == RunTerminal::Error {
            state.record.attention = Some(AttentionReason::Error);
        }
        // Only clear the run slot if a newer run has not replaced it.
        if state
            .run
            .as_ref()
            .is_some_and(|r| r.run_id == run_id)
        {
            state.run = None;
        }
        state.record.updated_at = Utc::now();
    }

    if terminal == RunTerminal::Cancelled {
        manager.permissions.clear_agent(&agent.id);
    }

    manager.fanout.publish(&AgentEvent::RunEnded {
        agent_id: agent.id.clone(),
        run_id: run_id.to_string(),
        status: terminal,
    });
    manager.publish_state(agent);
    manager.persist_async(agent);
    tracing::info!(agent_id = %agent.id, run_id = %run_id, status = ?terminal, "run ended");
}
