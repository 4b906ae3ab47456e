//! The session message union.
//!
//! Inbound (`ClientMessage`) and outbound (`ServerMessage`) frames for one
//! client session. Request-shaped messages carry a `request_id`; the daemon
//! answers each request id at most once. `terminal_input`, heartbeats, and
//! audio chunks are fire-and-forget.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use paseo_domain::agent::{AgentFilter, AgentMode, AgentSnapshot};
use paseo_domain::error::{CheckoutError, WireError};
use paseo_domain::event::{AgentEvent, FinishState};
use paseo_domain::timeline::{ImageBlock, Timeline};

use crate::types::{
    AgentUpdate, CheckoutStatus, CreateAgentParams, DiffFile, ExplorerOp, FileEntry, GitRepoInfo,
    ModelInfo, PaseoWorktreeInfo, PrStatus, TerminalInfo, VoiceConversation,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → daemon
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake. The daemon replies with `server_info`.
    ClientHello {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    // ── Agent lifecycle ──────────────────────────────────────────────
    CreateAgentRequest {
        request_id: String,
        #[serde(flatten)]
        params: CreateAgentParams,
    },
    ResumeAgentRequest {
        request_id: String,
        agent_id: String,
    },
    RefreshAgentRequest {
        request_id: String,
        agent_id: String,
    },
    InitializeAgentRequest {
        request_id: String,
        agent_id: String,
    },
    CancelAgentRequest {
        request_id: String,
        agent_id: String,
    },
    DeleteAgentRequest {
        request_id: String,
        agent_id: String,
    },
    ArchiveAgentRequest {
        request_id: String,
        agent_id: String,
    },
    SetAgentMode {
        request_id: String,
        agent_id: String,
        mode: AgentMode,
    },

    // ── Agent streaming ──────────────────────────────────────────────
    SendAgentMessageRequest {
        request_id: String,
        agent_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageBlock>,
    },
    AgentPermissionResponse {
        request_id: String,
        agent_id: String,
        permission_request_id: String,
        accept: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        remember_policy: Option<bool>,
    },
    WaitForFinishRequest {
        request_id: String,
        agent_id: String,
        /// Long-poll timeout in milliseconds (default 10 minutes).
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    // ── Agent queries ────────────────────────────────────────────────
    FetchAgentsRequest {
        request_id: String,
        #[serde(default)]
        filter: AgentFilter,
    },
    FetchAgentRequest {
        request_id: String,
        /// Exact id, unique prefix (≥ 4 chars), or exact title.
        agent_id: String,
    },
    SubscribeAgentUpdates {
        request_id: String,
        subscription_id: String,
        #[serde(default)]
        filter: AgentFilter,
    },
    UnsubscribeAgentUpdates {
        request_id: String,
        subscription_id: String,
    },

    // ── Checkout & worktree ──────────────────────────────────────────
    CheckoutStatusRequest {
        request_id: String,
        agent_id: String,
    },
    CheckoutDiffRequest {
        request_id: String,
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        base: Option<String>,
    },
    CheckoutCommitRequest {
        request_id: String,
        agent_id: String,
        /// Auto-generated when empty or absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    CheckoutMergeRequest {
        request_id: String,
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_branch: Option<String>,
        #[serde(default)]
        require_clean_target: bool,
    },
    CheckoutMergeFromBaseRequest {
        request_id: String,
        agent_id: String,
    },
    CheckoutPushRequest {
        request_id: String,
        agent_id: String,
    },
    CheckoutPrCreateRequest {
        request_id: String,
        agent_id: String,
        /// Auto-generated when empty or absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    CheckoutPrStatusRequest {
        request_id: String,
        agent_id: String,
    },
    PaseoWorktreeListRequest {
        request_id: String,
    },
    PaseoWorktreeArchiveRequest {
        request_id: String,
        worktree_path: PathBuf,
    },

    // ── Filesystem & project ─────────────────────────────────────────
    FileExplorerRequest {
        request_id: String,
        agent_id: String,
        op: ExplorerOp,
        /// Path relative to the agent's cwd.
        path: String,
    },
    FileDownloadTokenRequest {
        request_id: String,
        agent_id: String,
        path: String,
    },
    ProjectIconRequest {
        request_id: String,
        agent_id: String,
    },
    GitRepoInfoRequest {
        request_id: String,
        agent_id: String,
    },
    GitDiffRequest {
        request_id: String,
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    HighlightedDiffRequest {
        request_id: String,
        agent_id: String,
    },

    // ── Terminals ────────────────────────────────────────────────────
    ListTerminalsRequest {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    CreateTerminalRequest {
        request_id: String,
        cwd: PathBuf,
        name: String,
    },
    SubscribeTerminalRequest {
        request_id: String,
        terminal_id: String,
    },
    UnsubscribeTerminalRequest {
        request_id: String,
        terminal_id: String,
    },
    /// Fire-and-forget: write bytes to a terminal's stdin.
    TerminalInput {
        terminal_id: String,
        data_b64: String,
    },
    KillTerminalRequest {
        request_id: String,
        terminal_id: String,
    },

    // ── Voice ────────────────────────────────────────────────────────
    /// Fire-and-forget realtime audio; answered by `error_response` only
    /// when no voice provider is configured.
    RealtimeAudioChunk {
        chunk_b64: String,
    },
    SetVoiceConversation {
        request_id: String,
        conversation: VoiceConversation,
    },
    LoadVoiceConversationRequest {
        request_id: String,
        conversation_id: String,
    },
    ListVoiceConversationsRequest {
        request_id: String,
    },
    DeleteVoiceConversationRequest {
        request_id: String,
        conversation_id: String,
    },
    DictationStartRequest {
        request_id: String,
        dictation_id: String,
    },
    DictationChunk {
        dictation_id: String,
        chunk_b64: String,
    },
    DictationFinishRequest {
        request_id: String,
        dictation_id: String,
    },
    DictationCancelRequest {
        request_id: String,
        dictation_id: String,
    },

    // ── Control ──────────────────────────────────────────────────────
    RestartServerRequest {
        request_id: String,
    },
    ClientHeartbeat {},
    RegisterPushToken {
        request_id: String,
        token: String,
        platform: String,
    },
    ClearAgentAttention {
        request_id: String,
        agent_id: String,
    },
    ListProviderModelsRequest {
        request_id: String,
    },
}

impl ClientMessage {
    /// The request id, for request-shaped messages.
    pub fn request_id(&self) -> Option<&str> {
        use ClientMessage::*;
        match self {
            ClientHello { .. }
            | TerminalInput { .. }
            | RealtimeAudioChunk { .. }
            | DictationChunk { .. }
            | ClientHeartbeat {} => None,
            CreateAgentRequest { request_id, .. }
            | ResumeAgentRequest { request_id, .. }
            | RefreshAgentRequest { request_id, .. }
            | InitializeAgentRequest { request_id, .. }
            | CancelAgentRequest { request_id, .. }
            | DeleteAgentRequest { request_id, .. }
            | ArchiveAgentRequest { request_id, .. }
            | SetAgentMode { request_id, .. }
            | SendAgentMessageRequest { request_id, .. }
            | AgentPermissionResponse { request_id, .. }
            | WaitForFinishRequest { request_id, .. }
            | FetchAgentsRequest { request_id, .. }
            | FetchAgentRequest { request_id, .. }
            | SubscribeAgentUpdates { request_id, .. }
            | UnsubscribeAgentUpdates { request_id, .. }
            | CheckoutStatusRequest { request_id, .. }
            | CheckoutDiffRequest { request_id, .. }
            | CheckoutCommitRequest { request_id, .. }
            | CheckoutMergeRequest { request_id, .. }
            | CheckoutMergeFromBaseRequest { request_id, .. }
            | CheckoutPushRequest { request_id, .. }
            | CheckoutPrCreateRequest { request_id, .. }
            | CheckoutPrStatusRequest { request_id, .. }
            | PaseoWorktreeListRequest { request_id }
            | PaseoWorktreeArchiveRequest { request_id, .. }
            | FileExplorerRequest { request_id, .. }
            | FileDownloadTokenRequest { request_id, .. }
            | ProjectIconRequest { request_id, .. }
            | GitRepoInfoRequest { request_id, .. }
            | GitDiffRequest { request_id, .. }
            | HighlightedDiffRequest { request_id, .. }
            | ListTerminalsRequest { request_id, .. }
            | CreateTerminalRequest { request_id, .. }
            | SubscribeTerminalRequest { request_id, .. }
            | UnsubscribeTerminalRequest { request_id, .. }
            | KillTerminalRequest { request_id, .. }
            | SetVoiceConversation { request_id, .. }
            | LoadVoiceConversationRequest { request_id, .. }
            | ListVoiceConversationsRequest { request_id }
            | DeleteVoiceConversationRequest { request_id, .. }
            | DictationStartRequest { request_id, .. }
            | DictationFinishRequest { request_id, .. }
            | DictationCancelRequest { request_id, .. }
            | RestartServerRequest { request_id }
            | RegisterPushToken { request_id, .. }
            | ClearAgentAttention { request_id, .. }
            | ListProviderModelsRequest { request_id } => Some(request_id),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Daemon → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply; carries the daemon's authoritative server id.
    ServerInfo {
        server_id: String,
        version: String,
    },

    /// Failure reply for any request.
    ErrorResponse {
        request_id: String,
        error: WireError,
    },

    // ── Agent lifecycle ──────────────────────────────────────────────
    CreateAgentResponse {
        request_id: String,
        agent: AgentSnapshot,
    },
    ResumeAgentResponse {
        request_id: String,
        agent: AgentSnapshot,
        timeline: Timeline,
    },
    RefreshAgentResponse {
        request_id: String,
        agent: AgentSnapshot,
    },
    InitializeAgentResponse {
        request_id: String,
        agent: AgentSnapshot,
    },
    CancelAgentResponse {
        request_id: String,
        cancelled: bool,
    },
    DeleteAgentResponse {
        request_id: String,
    },
    ArchiveAgentResponse {
        request_id: String,
    },
    SetAgentModeResponse {
        request_id: String,
        agent: AgentSnapshot,
    },

    // ── Agent streaming ──────────────────────────────────────────────
    SendAgentMessageResponse {
        request_id: String,
        run_id: String,
    },
    AgentPermissionAck {
        request_id: String,
        resolved: bool,
    },
    WaitForFinishResponse {
        request_id: String,
        status: FinishState,
    },

    // ── Agent queries & push ─────────────────────────────────────────
    FetchAgentsResponse {
        request_id: String,
        agents: Vec<AgentSnapshot>,
    },
    FetchAgentResponse {
        request_id: String,
        agent: AgentSnapshot,
        timeline: Timeline,
    },
    SubscribeAgentUpdatesResponse {
        request_id: String,
        subscription_id: String,
    },
    UnsubscribeAgentUpdatesResponse {
        request_id: String,
    },
    /// Server push: projection change matching a subscription's filter.
    AgentUpdatePush {
        subscription_id: String,
        update: AgentUpdate,
    },
    /// Server push: a run/stream event for a subscribed agent.
    AgentEventPush {
        subscription_id: String,
        event: AgentEvent,
    },

    // ── Checkout & worktree ──────────────────────────────────────────
    CheckoutStatusResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<CheckoutStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutDiffResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutCommitResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commit_sha: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutMergeResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutMergeFromBaseResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutPushResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutPrCreateResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    CheckoutPrStatusResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pr: Option<PrStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    PaseoWorktreeListResponse {
        request_id: String,
        worktrees: Vec<PaseoWorktreeInfo>,
    },
    PaseoWorktreeArchiveResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },

    // ── Filesystem & project ─────────────────────────────────────────
    FileExplorerResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entries: Vec<FileEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_b64: Option<String>,
    },
    FileDownloadTokenResponse {
        request_id: String,
        token: String,
        url: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    ProjectIconResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon_b64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    GitRepoInfoResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<GitRepoInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    GitDiffResponse {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },
    HighlightedDiffResponse {
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files: Vec<DiffFile>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CheckoutError>,
    },

    // ── Terminals ────────────────────────────────────────────────────
    ListTerminalsResponse {
        request_id: String,
        terminals: Vec<TerminalInfo>,
    },
    CreateTerminalResponse {
        request_id: String,
        terminal: TerminalInfo,
    },
    SubscribeTerminalResponse {
        request_id: String,
        terminal_id: String,
        /// Ring-buffer tail so UIs can render immediately.
        history_b64: String,
    },
    UnsubscribeTerminalResponse {
        request_id: String,
    },
    TerminalOutput {
        terminal_id: String,
        data_b64: String,
    },
    TerminalExited {
        terminal_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    KillTerminalResponse {
        request_id: String,
        killed: bool,
    },

    // ── Voice ────────────────────────────────────────────────────────
    SetVoiceConversationResponse {
        request_id: String,
    },
    LoadVoiceConversationResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation: Option<VoiceConversation>,
    },
    ListVoiceConversationsResponse {
        request_id: String,
        conversations: Vec<VoiceConversation>,
    },
    DeleteVoiceConversationResponse {
        request_id: String,
        deleted: bool,
    },
    DictationStartResponse {
        request_id: String,
        dictation_id: String,
    },
    DictationFinishResponse {
        request_id: String,
        dictation_id: String,
        text: String,
    },
    DictationCancelResponse {
        request_id: String,
        dictation_id: String,
    },

    // ── Control ──────────────────────────────────────────────────────
    RestartServerResponse {
        request_id: String,
    },
    HeartbeatAck {},
    RegisterPushTokenResponse {
        request_id: String,
    },
    ClearAgentAttentionResponse {
        request_id: String,
        agent: AgentSnapshot,
    },
    ListProviderModelsResponse {
        request_id: String,
        models: Vec<ModelInfo>,
    },
}

impl ServerMessage {
    /// The request id this frame answers, if it is a response.
    pub fn request_id(&self) -> Option<&str> {
        use ServerMessage::*;
        match self {
            ServerInfo { .. }
            | AgentUpdatePush { .. }
            | AgentEventPush { .. }
            | TerminalOutput { .. }
            | TerminalExited { .. }
            | HeartbeatAck {} => None,
            ErrorResponse { request_id, .. }
            | CreateAgentResponse { request_id, .. }
            | ResumeAgentResponse { request_id, .. }
            | RefreshAgentResponse { request_id, .. }
            | InitializeAgentResponse { request_id, .. }
            | CancelAgentResponse { request_id, .. }
            | DeleteAgentResponse { request_id }
            | ArchiveAgentResponse { request_id }
            | SetAgentModeResponse { request_id, .. }
            | SendAgentMessageResponse { request_id, .. }
            | AgentPermissionAck { request_id, .. }
            | WaitForFinishResponse { request_id, .. }
            | FetchAgentsResponse { request_id, .. }
            | FetchAgentResponse { request_id, .. }
            | SubscribeAgentUpdatesResponse { request_id, .. }
            | UnsubscribeAgentUpdatesResponse { request_id }
            | CheckoutStatusResponse { request_id, .. }
            | CheckoutDiffResponse { request_id, .. }
            | CheckoutCommitResponse { request_id, .. }
            | CheckoutMergeResponse { request_id, .. }
            | CheckoutMergeFromBaseResponse { request_id, .. }
            | CheckoutPushResponse { request_id, .. }
            | CheckoutPrCreateResponse { request_id, .. }
            | CheckoutPrStatusResponse { request_id, .. }
            | PaseoWorktreeListResponse { request_id, .. }
            | PaseoWorktreeArchiveResponse { request_id, .. }
            | FileExplorerResponse { request_id, .. }
            | FileDownloadTokenResponse { request_id, .. }
            | ProjectIconResponse { request_id, .. }
            | GitRepoInfoResponse { request_id, .. }
            | GitDiffResponse { request_id, .. }
            | HighlightedDiffResponse { request_id, .. }
            | ListTerminalsResponse { request_id, .. }
            | CreateTerminalResponse { request_id, .. }
            | SubscribeTerminalResponse { request_id, .. }
            | UnsubscribeTerminalResponse { request_id }
            | KillTerminalResponse { request_id, .. }
            | SetVoiceConversationResponse { request_id }
            | LoadVoiceConversationResponse { request_id, .. }
            | ListVoiceConversationsResponse { request_id, .. }
            | DeleteVoiceConversationResponse { request_id, .. }
            | DictationStartResponse { request_id, .. }
            | DictationFinishResponse { request_id, .. }
            | DictationCancelResponse { request_id, .. }
            | RestartServerResponse { request_id }
            | RegisterPushTokenResponse { request_id }
            | ClearAgentAttentionResponse { request_id, .. }
            | ListProviderModelsResponse { request_id, .. } => Some(request_id),
        }
    }

    /// Whether this frame is server-push rather than a request reply.
    /// Push frames are subject to fan-out back-pressure; replies are not.
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            ServerMessage::AgentUpdatePush { .. }
                | ServerMessage::AgentEventPush { .. }
                | ServerMessage::TerminalOutput { .. }
                | ServerMessage::TerminalExited { .. }
        )
    }
}
