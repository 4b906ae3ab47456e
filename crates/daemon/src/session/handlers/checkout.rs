//! Checkout and worktree verbs. Failures surface as the structured
//! checkout taxonomy (`NOT_GIT_REPO | NOT_ALLOWED | MERGE_CONFLICT |
//! UNKNOWN`) inside each response, not as generic error frames.

use std::path::PathBuf;

use paseo_domain::error::CheckoutError;
use paseo_domain::Result;
use paseo_protocol::session::ServerMessage;

use crate::session::Session;
use crate::worktree::checkout as ops;

fn agent_cwd(session: &Session, agent_id: &str) -> Result<PathBuf> {
    let id = session.daemon.agents.resolve_identifier(agent_id)?;
    let agent = session
        .daemon
        .agents
        .get(&id)
        .ok_or_else(|| paseo_domain::Error::AgentNotFound(id.clone()))?;
    Ok(agent.snapshot().cwd)
}

pub async fn status(session: &Session, request_id: String, agent_id: &str) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(match ops::status(&cwd).await {
        Ok(status) => ServerMessage::CheckoutStatusResponse {
            request_id,
            success: true,
            status: Some(status),
            error: None,
        },
        Err(e) => ServerMessage::CheckoutStatusResponse {
            request_id,
            success: false,
            status: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn diff(
    session: &Session,
    request_id: String,
    agent_id: &str,
    base: Option<String>,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(match ops::diff(&cwd, base.as_deref()).await {
        Ok(diff) => ServerMessage::CheckoutDiffResponse {
            request_id,
            success: true,
            diff: Some(diff),
            error: None,
        },
        Err(e) => ServerMessage::CheckoutDiffResponse {
            request_id,
            success: false,
            diff: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn commit(
    session: &Session,
    request_id: String,
    agent_id: &str,
    message: Option<String>,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    let metadata = session.daemon.agents.providers().metadata_model();
    Ok(match ops::commit(&cwd, message, metadata).await {
        Ok((message, sha)) => ServerMessage::CheckoutCommitResponse {
            request_id,
            success: true,
            message: Some(message),
            commit_sha: Some(sha),
            error: None,
        },
        Err(e) => ServerMessage::CheckoutCommitResponse {
            request_id,
            success: false,
            message: None,
            commit_sha: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn merge(
    session: &Session,
    request_id: String,
    agent_id: &str,
    target_branch: Option<String>,
    require_clean_target: bool,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(
        match ops::merge(&cwd, target_branch.as_deref(), require_clean_target).await {
            Ok(()) => ServerMessage::CheckoutMergeResponse {
                request_id,
                success: true,
                error: None,
            },
            Err(e) => ServerMessage::CheckoutMergeResponse {
                request_id,
                success: false,
                error: Some(CheckoutError::from(&e)),
            },
        },
    )
}

pub async fn merge_from_base(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    // The base branch comes from worktree metadata; plain checkouts merge
    // from their upstream's default.
    let base = session
        .daemon
        .worktrees
        .base_branch_of(&cwd)
        .unwrap_or_else(|| "main".to_string());
    Ok(match ops::merge_from_base(&cwd, &base).await {
        Ok(()) => ServerMessage::CheckoutMergeFromBaseResponse {
            request_id,
            success: true,
            error: None,
        },
        Err(e) => ServerMessage::CheckoutMergeFromBaseResponse {
            request_id,
            success: false,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn push(session: &Session, request_id: String, agent_id: &str) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(match ops::push(&cwd).await {
        Ok(()) => ServerMessage::CheckoutPushResponse {
            request_id,
            success: true,
            error: None,
        },
        Err(e) => ServerMessage::CheckoutPushResponse {
            request_id,
            success: false,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn pr_create(
    session: &Session,
    request_id: String,
    agent_id: &str,
    title: Option<String>,
    body: Option<String>,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    let metadata = session.daemon.agents.providers().metadata_model();
    Ok(match ops::pr_create(&cwd, title, body, metadata).await {
        Ok(url) => ServerMessage::CheckoutPrCreateResponse {
            request_id,
            success: true,
            url: Some(url),
            error: None,
        },
        Err(e) => ServerMessage::CheckoutPrCreateResponse {
            request_id,
            success: false,
            url: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn pr_status(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(match ops::pr_status(&cwd).await {
        Ok(pr) => ServerMessage::CheckoutPrStatusResponse {
            request_id,
            success: true,
            pr: Some(pr),
            error: None,
        },
        Err(e) => ServerMessage::CheckoutPrStatusResponse {
            request_id,
            success: false,
            pr: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn worktree_list(session: &Session, request_id: String) -> Result<ServerMessage> {
    Ok(ServerMessage::PaseoWorktreeListResponse {
        request_id,
        worktrees: session.daemon.worktrees.list(),
    })
}

/// Archive a paseo-owned worktree: verify ownership, close every resident
/// agent, then delete the worktree.
pub async fn worktree_archive(
    session: &Session,
    request_id: String,
    worktree_path: PathBuf,
) -> Result<ServerMessage> {
    let check = session
        .daemon
        .worktrees
        .is_paseo_owned_worktree_cwd(&worktree_path);
    if !check.allowed {
        return Ok(ServerMessage::PaseoWorktreeArchiveResponse {
            request_id,
            success: false,
            error: Some(CheckoutError::from(&paseo_domain::Error::NotAllowed(
                format!("not a paseo-owned worktree: {}", worktree_path.display()),
            ))),
        });
    }

    let result = async {
        let closed = session
            .daemon
            .agents
            .close_agents_under(&worktree_path)
            .await?;
        if !closed.is_empty() {
            tracing::info!(
                worktree = %worktree_path.display(),
                agents = closed.len(),
                "closed agents before archive"
            );
        }
        session
            .daemon
            .worktrees
            .delete_paseo_worktree(&worktree_path)
            .await
    }
    .await;

    Ok(match result {
        Ok(()) => ServerMessage::PaseoWorktreeArchiveResponse {
            request_id,
            success: true,
            error: None,
        },
        Err(e) => ServerMessage::PaseoWorktreeArchiveResponse {
            request_id,
            success: false,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn repo_info(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(match ops::repo_info(&cwd).await {
        Ok(info) => ServerMessage::GitRepoInfoResponse {
            request_id,
            success: true,
            info: Some(info),
            error: None,
        },
        Err(e) => ServerMessage::GitRepoInfoResponse {
            request_id,
            success: false,
            info: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn git_diff(
    session: &Session,
    request_id: String,
    agent_id: &str,
    path: Option<String>,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    let result = match path {
        Some(path) => {
            crate::worktree::git::git(&cwd, &["diff", "HEAD", "--", &path]).await
        }
        None => ops::diff(&cwd, None).await,
    };
    Ok(match result {
        Ok(diff) => ServerMessage::GitDiffResponse {
            request_id,
            success: true,
            diff: Some(diff),
            error: None,
        },
        Err(e) => ServerMessage::GitDiffResponse {
            request_id,
            success: false,
            diff: None,
            error: Some(CheckoutError::from(&e)),
        },
    })
}

pub async fn highlighted_diff(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    Ok(match ops::structured_diff(&cwd).await {
        Ok(files) => ServerMessage::HighlightedDiffResponse {
            request_id,
            success: true,
            files,
            error: None,
        },
        Err(e) => ServerMessage::HighlightedDiffResponse {
            request_id,
            success: false,
            files: Vec::new(),
            error: Some(CheckoutError::from(&e)),
        },
    })
}
