//! File explorer and download-token verbs, constrained to the agent cwd.

use paseo_domain::Result;
use paseo_protocol::session::ServerMessage;
use paseo_protocol::types::ExplorerOp;

use crate::files as fs_ops;
use crate::session::{base64_encode, Session};

fn agent_cwd(session: &Session, agent_id: &str) -> Result<std::path::PathBuf> {
    let id = session.daemon.agents.resolve_identifier(agent_id)?;
    let agent = session
        .daemon
        .agents
        .get(&id)
        .ok_or_else(|| paseo_domain::Error::AgentNotFound(id.clone()))?;
    Ok(agent.snapshot().cwd)
}

pub async fn explorer(
    session: &Session,
    request_id: String,
    agent_id: &str,
    op: ExplorerOp,
    path: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    match op {
        ExplorerOp::List => {
            let entries = fs_ops::list_dir(&cwd, path)?;
            Ok(ServerMessage::FileExplorerResponse {
                request_id,
                entries,
                content_b64: None,
            })
        }
        ExplorerOp::Read => {
            let bytes = fs_ops::read_file(&cwd, path)?;
            Ok(ServerMessage::FileExplorerResponse {
                request_id,
                entries: Vec::new(),
                content_b64: Some(base64_encode(&bytes)),
            })
        }
    }
}

pub async fn download_token(
    session: &Session,
    request_id: String,
    agent_id: &str,
    path: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    let (token, expires_at) = session.daemon.downloads.issue(&cwd, path)?;
    let url = format!(
        "http://{}/download/{token}",
        session.daemon.config.listen
    );
    Ok(ServerMessage::FileDownloadTokenResponse {
        request_id,
        token,
        url,
        expires_at,
    })
}

pub async fn project_icon(
    session: &Session,
    request_id: String,
    agent_id: &str,
) -> Result<ServerMessage> {
    let cwd = agent_cwd(session, agent_id)?;
    let (icon_b64, media_type) = match fs_ops::project_icon(&cwd) {
        Some((bytes, media_type)) => (Some(base64_encode(&bytes)), Some(media_type)),
        None => (None, None),
    };
    Ok(ServerMessage::ProjectIconResponse {
        request_id,
        icon_b64,
        media_type,
    })
}
