//! Provider and agent event unions.

use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::agent::AgentSnapshot;
use crate::timeline::PermissionOutcome;

/// A boxed async stream, used for provider event streams.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events produced by a provider session during one run, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    TextDelta {
        text: String,
    },

    ToolCall {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    PermissionRequest {
        request_id: String,
        tool_name: String,
        action: serde_json::Value,
    },

    Finish {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    Error {
        message: String,
    },
}

/// Terminal status of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTerminal {
    Idle,
    Error,
    Cancelled,
}

/// Terminal states observed by `wait_for_finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishState {
    Idle,
    Permission,
    Error,
    Timeout,
}

/// Events fanned out to agent-manager subscribers. A subscriber receives
/// either a full `agent_state` snapshot or a wrapped provider event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentState {
        agent: AgentSnapshot,
    },

    AgentRemoved {
        agent_id: String,
    },

    RunStarted {
        agent_id: String,
        run_id: String,
    },

    RunEvent {
        agent_id: String,
        run_id: String,
        event: ProviderEvent,
    },

    RunEnded {
        agent_id: String,
        run_id: String,
        status: RunTerminal,
    },

    PermissionResolved {
        agent_id: String,
        request_id: String,
        outcome: PermissionOutcome,
    },
}

impl AgentEvent {
    /// The agent this event concerns, when it has one.
    pub fn agent_id(&self) -> &str {
        match self {
            AgentEvent::AgentState { agent } => &agent.id,
            AgentEvent::AgentRemoved { agent_id } => agent_id,
            AgentEvent::RunStarted { agent_id, .. } => agent_id,
            AgentEvent::RunEvent { agent_id, .. } => agent_id,
            AgentEvent::RunEnded { agent_id, .. } => agent_id,
            AgentEvent::PermissionResolved { agent_id, .. } => agent_id,
        }
    }
}
