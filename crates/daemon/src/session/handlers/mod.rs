//! Verb dispatch. Each handler returns the typed response frame or a
//! domain error that the session maps to `error_response`.

pub mod agents;
pub mod checkout;
pub mod files;
pub mod terminals;
pub mod voice;

use paseo_domain::Result;
use paseo_protocol::session::{ClientMessage, ServerMessage};

use crate::session::Session;

pub async fn handle_request(session: &Session, msg: ClientMessage) -> Result<ServerMessage> {
    use ClientMessage::*;
    match msg {
        // ── Agent lifecycle ──────────────────────────────────────────
        CreateAgentRequest { request_id, params } => {
            agents::create(session, request_id, params).await
        }
        ResumeAgentRequest {
            request_id,
            agent_id,
        } => agents::resume(session, request_id, &agent_id).await,
        RefreshAgentRequest {
            request_id,
            agent_id,
        } => agents::refresh(session, request_id, &agent_id).await,
        InitializeAgentRequest {
            request_id,
            agent_id,
        } => agents::initialize(session, request_id, &agent_id).await,
        CancelAgentRequest {
            request_id,
            agent_id,
        } => agents::cancel(session, request_id, &agent_id).await,
        DeleteAgentRequest {
            request_id,
            agent_id,
        } => agents::delete(session, request_id, &agent_id).await,
        ArchiveAgentRequest {
            request_id,
            agent_id,
        } => agents::archive(session, request_id, &agent_id).await,
        SetAgentMode {
            request_id,
            agent_id,
            mode,
        } => agents::set_mode(session, request_id, &agent_id, mode).await,

        // ── Agent streaming ──────────────────────────────────────────
        SendAgentMessageRequest {
            request_id,
            agent_id,
            text,
            images,
        } => agents::send_message(session, request_id, &agent_id, text, images).await,
        AgentPermissionResponse {
            request_id,
            agent_id,
            permission_request_id,
            accept,
            remember_policy: _,
        } => agents::permission_response(session, request_id, &agent_id, &permission_request_id, accept).await,
        WaitForFinishRequest {
            request_id,
            agent_id,
            timeout_ms,
        } => agents::wait_for_finish(session, request_id, &agent_id, timeout_ms).await,

        // ── Agent queries ────────────────────────────────────────────
        FetchAgentsRequest { request_id, filter } => {
            agents::fetch_agents(session, request_id, filter).await
        }
        FetchAgentRequest {
            request_id,
            agent_id,
        } => agents::fetch_agent(session, request_id, &agent_id).await,
        SubscribeAgentUpdates {
            request_id,
            subscription_id,
            filter,
        } => agents::subscribe(session, request_id, subscription_id, filter).await,
        UnsubscribeAgentUpdates {
            request_id,
            subscription_id,
        } => agents::unsubscribe(session, request_id, &subscription_id).await,

        // ── Checkout & worktree ──────────────────────────────────────
        CheckoutStatusRequest {
            request_id,
            agent_id,
        } => checkout::status(session, request_id, &agent_id).await,
        CheckoutDiffRequest {
            request_id,
            agent_id,
            base,
        } => checkout::diff(session, request_id, &agent_id, base).await,
        CheckoutCommitRequest {
            request_id,
            agent_id,
            message,
        } => checkout::commit(session, request_id, &agent_id, message).await,
        CheckoutMergeRequest {
            request_id,
            agent_id,
            target_branch,
            require_clean_target,
        } => {
            checkout::merge(
                session,
                request_id,
                &agent_id,
                target_branch,
                require_clean_target,
            )
            .await
        }
        CheckoutMergeFromBaseRequest {
            request_id,
            agent_id,
        } => checkout::merge_from_base(session, request_id, &agent_id).await,
        CheckoutPushRequest {
            request_id,
            agent_id,
        } => checkout::push(session, request_id, &agent_id).await,
        CheckoutPrCreateRequest {
            request_id,
            agent_id,
            title,
            body,
        } => checkout::pr_create(session, request_id, &agent_id, title, body).await,
        CheckoutPrStatusRequest {
            request_id,
            agent_id,
        } => checkout::pr_status(session, request_id, &agent_id).await,
        PaseoWorktreeListRequest { request_id } => {
            checkout::worktree_list(session, request_id).await
        }
        PaseoWorktreeArchiveRequest {
            request_id,
            worktree_path,
        } => checkout::worktree_archive(session, request_id, worktree_path).await,

        // ── Filesystem & project ─────────────────────────────────────
        FileExplorerRequest {
            request_id,
            agent_id,
            op,
            path,
        } => files::explorer(session, request_id, &agent_id, op, &path).await,
        FileDownloadTokenRequest {
            request_id,
            agent_id,
            path,
        } => files::download_token(session, request_id, &agent_id, &path).await,
        ProjectIconRequest {
            request_id,
            agent_id,
        } => files::project_icon(session, request_id, &agent_id).await,
        GitRepoInfoRequest {
            request_id,
            agent_id,
        } => checkout::repo_info(session, request_id, &agent_id).await,
        GitDiffRequest {
            request_id,
            agent_id,
            path,
        } => checkout::git_diff(session, request_id, &agent_id, path).await,
        HighlightedDiffRequest {
            request_id,
            agent_id,
        } => checkout::highlighted_diff(session, request_id, &agent_id).await,

        // ── Terminals ────────────────────────────────────────────────
        ListTerminalsRequest { request_id, cwd } => {
            terminals::list(session, request_id, cwd).await
        }
        CreateTerminalRequest {
            request_id,
            cwd,
            name,
        } => terminals::create(session, request_id, cwd, name).await,
        SubscribeTerminalRequest {
            request_id,
            terminal_id,
        } => terminals::subscribe(session, request_id, &terminal_id).await,
        UnsubscribeTerminalRequest {
            request_id,
            terminal_id,
        } => terminals::unsubscribe(session, request_id, &terminal_id).await,
        KillTerminalRequest {
            request_id,
            terminal_id,
        } => terminals::kill(session, request_id, &terminal_id).await,

        // ── Voice ────────────────────────────────────────────────────
        SetVoiceConversation {
            request_id,
            conversation,
        } => voice::set_conversation(session, request_id, conversation).await,
        LoadVoiceConversationRequest {
            request_id,
            conversation_id,
        } => voice::load_conversation(session, request_id, &conversation_id).await,
        ListVoiceConversationsRequest { request_id } => {
            voice::list_conversations(session, request_id).await
        }
        DeleteVoiceConversationRequest {
            request_id,
            conversation_id,
        } => voice::delete_conversation(session, request_id, &conversation_id).await,
        DictationStartRequest { request_id, .. }
        | DictationFinishRequest { request_id, .. }
        | DictationCancelRequest { request_id, .. } => voice::dictation_unavailable(request_id),

        // ── Control ──────────────────────────────────────────────────
        RestartServerRequest { request_id } => {
            session.daemon.restart.request_restart();
            Ok(ServerMessage::RestartServerResponse { request_id })
        }
        RegisterPushToken {
            request_id,
            token,
            platform,
        } => {
            session.daemon.push_tokens.register(&token, &platform)?;
            Ok(ServerMessage::RegisterPushTokenResponse { request_id })
        }
        ClearAgentAttention {
            request_id,
            agent_id,
        } => agents::clear_attention(session, request_id, &agent_id).await,
        ListProviderModelsRequest { request_id } => {
            let models = session.daemon.agents.providers().list_models().await;
            Ok(ServerMessage::ListProviderModelsResponse {
                request_id,
                models: models
                    .into_iter()
                    .map(|m| paseo_protocol::types::ModelInfo {
                        provider: m.provider,
                        id: m.id,
                        label: m.label,
                    })
                    .collect(),
            })
        }

        // Inline-handled verbs never reach here.
        ClientHello { .. }
        | ClientHeartbeat {}
        | TerminalInput { .. }
        | RealtimeAudioChunk { .. }
        | DictationChunk { .. } => Err(paseo_domain::Error::BadRequest(
            "not a request verb".into(),
        )),
    }
}
