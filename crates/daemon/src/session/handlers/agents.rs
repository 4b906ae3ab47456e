//! Agent lifecycle, streaming, and query verbs.

use std::time::Duration;

use paseo_domain::agent::{AgentConfig, AgentFilter, AgentMode};
use paseo_domain::timeline::ImageBlock;
use paseo_domain::Result;
use paseo_protocol::session::ServerMessage;
use paseo_protocol::types::CreateAgentParams;
use paseo_providers::AgentPrompt;

use crate::agents::metadata;
use crate::session::Session;
use crate::worktree::setup;

const DEFAULT_WAIT_FOR_FINISH: Duration = Duration::from_secs(600);

fn resolve(session: &Session, identifier: &str) -> Result<String> {
    session.daemon.agents.resolve_identifier(identifier)
}

pub async fn create(
    session: &Session,
    request_id: String,
    params: CreateAgentParams,
) -> Result<ServerMessage> {
    let CreateAgentParams {
        provider,
        model,
        cwd,
        mode,
        labels,
        prompt,
        worktree,
    } = params;

    // An agent may be born inside a fresh paseo-owned worktree.
    let (cwd, setup_commands) = match &worktree {
        Some(wt) => {
            let info = session.daemon.worktrees.create_worktree(&cwd, wt).await?;
            (info.worktree_path, wt.setup_commands.clone())
        }
        None => (cwd, Vec::new()),
    };

    let agent = session
        .daemon
        .agents
        .create_agent(AgentConfig {
            provider,
            model,
            cwd: cwd.clone(),
            mode,
            labels,
        })
        .await?;
    let agent_id = agent.id.clone();

    if !setup_commands.is_empty() {
        let manager = session.daemon.agents.clone();
        let setup_agent = agent_id.clone();
        let setup_cwd = cwd.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        tokio::spawn(async move {
            if let Err(e) = setup::run_worktree_setup_commands(
                &manager,
                &setup_agent,
                &setup_cwd,
                &setup_commands,
                &cancel,
            )
            .await
            {
                tracing::warn!(agent_id = %setup_agent, error = %e, "worktree setup failed");
            }
        });
    }

    if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
        metadata::spawn_generate(
            session.daemon.agents.clone(),
            agent_id.clone(),
            prompt.clone(),
        );
        session
            .daemon
            .agents
            .send_message(&agent_id, AgentPrompt::text(prompt))
            .await?;
    }

    Ok(ServerMessage::CreateAgentResponse {
        request_id,
        agent: agent.snapshot(),
    })
}

pub async fn resume(session: &Session, request_id: String, agent_id: &str) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let agent = session.daemon.agents.ensure_loaded(&id).await?;
    Ok(ServerMessage::ResumeAgentResponse {
        request_id,
        agent: agent.snapshot(),
        timeline: agent.timeline(),
    })
}

pub async fn refresh(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let agent = session
        .daemon
        .agents
        .get(&id)
        .ok_or_else(|| paseo_domain::Error::AgentNotFound(id.clone()))?;
    Ok(ServerMessage::RefreshAgentResponse {
        request_id,
        agent: agent.snapshot(),
    })
}

pub async fn initialize(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let agent = session.daemon.agents.ensure_loaded(&id).await?;
    Ok(ServerMessage::InitializeAgentResponse {
        request_id,
        agent: agent.snapshot(),
    })
}

pub async fn cancel(session: &Session, request_id: String, agent_id: &str) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let cancelled = session.daemon.agents.cancel_run(&id, true).await?;
    Ok(ServerMessage::CancelAgentResponse {
        request_id,
        cancelled,
    })
}

pub async fn delete(session: &Session, request_id: String, agent_id: &str) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    session.daemon.agents.delete(&id).await?;
    Ok(ServerMessage::DeleteAgentResponse { request_id })
}

pub async fn archive(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    session.daemon.agents.archive(&id).await?;
    Ok(ServerMessage::ArchiveAgentResponse { request_id })
}

pub async fn set_mode(
    session: &Session,
    request_id: String,
    agent_id: &str,
    mode: AgentMode,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let agent = session.daemon.agents.set_mode(&id, mode).await?;
    Ok(ServerMessage::SetAgentModeResponse { request_id, agent })
}

pub async fn send_message(
    session: &Session,
    request_id: String,
    agent_id: &str,
    text: String,
    images: Vec<ImageBlock>,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let run_id = session
        .daemon
        .agents
        .send_message(&id, AgentPrompt { text, images })
        .await?;
    Ok(ServerMessage::SendAgentMessageResponse { request_id, run_id })
}

pub async fn permission_response(
    session: &Session,
    request_id: String,
    agent_id: &str,
    permission_request_id: &str,
    accept: bool,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let resolved = session
        .daemon
        .agents
        .respond_permission(&id, permission_request_id, accept)
        .await?;
    Ok(ServerMessage::AgentPermissionAck {
        request_id,
        resolved,
    })
}

pub async fn wait_for_finish(
    session: &Session,
    request_id: String,
    agent_id: &str,
    timeout_ms: Option<u64>,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_WAIT_FOR_FINISH);
    let status = session.daemon.agents.wait_for_finish(&id, timeout).await?;
    Ok(ServerMessage::WaitForFinishResponse { request_id, status })
}

pub async fn fetch_agents(
    session: &Session,
    request_id: String,
    filter: AgentFilter,
) -> Result<ServerMessage> {
    Ok(ServerMessage::FetchAgentsResponse {
        request_id,
        agents: session.daemon.agents.list(&filter),
    })
}

pub async fn fetch_agent(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let agent = session
        .daemon
        .agents
        .get(&id)
        .ok_or_else(|| paseo_domain::Error::AgentNotFound(id.clone()))?;
    Ok(ServerMessage::FetchAgentResponse {
        request_id,
        agent: agent.snapshot(),
        timeline: agent.timeline(),
    })
}

pub async fn subscribe(
    session: &Session,
    request_id: String,
    subscription_id: String,
    filter: AgentFilter,
) -> Result<ServerMessage> {
    session.add_agent_subscription(&subscription_id, filter)?;
    Ok(ServerMessage::SubscribeAgentUpdatesResponse {
        request_id,
        subscription_id,
    })
}

pub async fn unsubscribe(
    session: &Session,
    request_id: String,
    subscription_id: &str,
) -> Result<ServerMessage> {
    session.remove_agent_subscription(subscription_id);
    Ok(ServerMessage::UnsubscribeAgentUpdatesResponse { request_id })
}

pub async fn clear_attention(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let id = resolve(session, agent_id)?;
    let agent = session.daemon.agents.clear_attention(&id).await?;
    Ok(ServerMessage::ClearAgentAttentionResponse { request_id, agent })
}
