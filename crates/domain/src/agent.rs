//! Agent records, snapshots, and filters.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeline::Timeline;

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLifecycle {
    Idle,
    Running,
    Error,
}

/// Why an agent is flagged for user attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionReason {
    Permission,
    Error,
}

/// Permission-gating mode for tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Default,
    Plan,
    AcceptEdits,
    BypassPermissions,
}

/// Static configuration for a managed agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider id (e.g. `"anthropic"`, `"scripted"`).
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Absolute working directory; must exist at create time.
    pub cwd: PathBuf,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// The persisted form of an agent: everything needed to resume it after a
/// daemon restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub config: AgentConfig,
    pub lifecycle: AgentLifecycle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Provider persistence handle, when the provider supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<AttentionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub timeline: Timeline,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(id: String, config: AgentConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            config,
            lifecycle: AgentLifecycle::Idle,
            title: None,
            branch_name: None,
            persistence: None,
            archived: false,
            attention: None,
            last_error: None,
            timeline: Timeline::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Wire projection, without the timeline.
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            cwd: self.config.cwd.clone(),
            mode: self.config.mode,
            labels: self.config.labels.clone(),
            lifecycle: self.lifecycle,
            archived: self.archived,
            attention: self.attention,
            branch_name: self.branch_name.clone(),
            last_error: self.last_error.clone(),
            timeline_len: self.timeline.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// First 8 characters of the id, used in ambiguity errors and logs.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// Client-facing projection of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub cwd: PathBuf,
    pub mode: AgentMode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    pub lifecycle: AgentLifecycle,
    #[serde(default)]
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<AttentionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub timeline_len: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for `fetch_agents` and `subscribe_agent_updates`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    /// Label equality constraints; every entry must match.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Include archived agents (default false).
    #[serde(default)]
    pub include_archived: bool,
}

impl AgentFilter {
    pub fn matches(&self, snapshot: &AgentSnapshot) -> bool {
        if snapshot.archived && !self.include_archived {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| snapshot.labels.get(k) == Some(v))
    }
}
