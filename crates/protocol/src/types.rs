//! Wire-only payload structs shared by request and response frames.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paseo_domain::agent::AgentMode;

/// Parameters for `create_agent_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentParams {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub cwd: PathBuf,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Optional initial prompt; when present the run starts immediately and
    /// metadata (title, branch name) is generated in the background.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Create a paseo-owned worktree and run the agent inside it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeParams>,
}

/// Parameters for creating a paseo-owned worktree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeParams {
    pub branch_name: String,
    pub base_branch: String,
    pub worktree_slug: String,
    /// Stash uncommitted changes in the owning repo before creating the
    /// worktree. Without this, a dirty repo refuses the operation.
    #[serde(default)]
    pub allow_stash: bool,
    /// Setup commands to run sequentially inside the new worktree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_commands: Vec<String>,
}

/// A paseo-owned worktree as reported by `paseo_worktree_list_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaseoWorktreeInfo {
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub repo_root: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Result of one worktree setup command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupCommandResult {
    pub command: String,
    pub cwd: PathBuf,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// `checkout_status_request` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutStatus {
    pub branch: String,
    pub dirty: bool,
    pub changed_files: Vec<String>,
    pub ahead: u32,
    pub behind: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

/// Repository info for `git_repo_info_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepoInfo {
    pub repo_root: PathBuf,
    pub branch: String,
    pub dirty: bool,
    pub ahead: u32,
    pub behind: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

/// One file of a structured diff for `highlighted_diff_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub additions: u32,
    pub deletions: u32,
    pub patch: String,
}

/// Directory entry for `file_explorer_request` listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// File explorer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorerOp {
    List,
    Read,
}

/// Terminal summary for list/create responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub terminal_id: String,
    pub cwd: PathBuf,
    pub name: String,
    pub running: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored voice conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConversation {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<VoiceMessage>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// A model advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Pull-request state for `checkout_pr_status_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrStatus {
    pub state: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Agent-update push payload: a projection upsert or a removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AgentUpdate {
    Upsert {
        agent: paseo_domain::agent::AgentSnapshot,
    },
    Remove {
        agent_id: String,
    },
}
