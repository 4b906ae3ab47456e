//! Terminal verbs. The terminal manager is an external collaborator; the
//! session only subscribes, forwards frames, and relays input.

use std::path::PathBuf;

use paseo_domain::Result;
use paseo_protocol::session::ServerMessage;
use paseo_protocol::types::TerminalInfo;
use paseo_term::TerminalSummary;

use crate::session::{base64_decode, base64_encode, Session};

fn info(summary: TerminalSummary) -> TerminalInfo {
    TerminalInfo {
        terminal_id: summary.terminal_id,
        cwd: summary.cwd,
        name: summary.name,
        running: summary.running,
        created_at: summary.created_at,
    }
}

pub async fn list(
    session: &Session,
    request_id: String,
    cwd: Option<PathBuf>,
) -> Result<ServerMessage> {
    let terminals = session
        .daemon
        .terminals
        .list(cwd.as_deref())
        .into_iter()
        .map(info)
        .collect();
    Ok(ServerMessage::ListTerminalsResponse {
        request_id,
        terminals,
    })
}

pub async fn create(
    session: &Session,
    request_id: String,
    cwd: PathBuf,
    name: String,
) -> Result<ServerMessage> {
    let terminal = session.daemon.terminals.create(&cwd, &name).await?;
    Ok(ServerMessage::CreateTerminalResponse {
        request_id,
        terminal: TerminalInfo {
            terminal_id: terminal.id.clone(),
            cwd: terminal.cwd.clone(),
            name: terminal.name.clone(),
            running: terminal.running(),
            created_at: terminal.created_at,
        },
    })
}

pub async fn subscribe(
    session: &Session,
    request_id: String,
    terminal_id: &str,
) -> Result<ServerMessage> {
    let history = session.add_terminal_subscription(terminal_id)?;
    Ok(ServerMessage::SubscribeTerminalResponse {
        request_id,
        terminal_id: terminal_id.to_string(),
        history_b64: base64_encode(&history),
    })
}

pub async fn unsubscribe(
    session: &Session,
    request_id: String,
    terminal_id: &str,
) -> Result<ServerMessage> {
    session.remove_terminal_subscription(terminal_id);
    Ok(ServerMessage::UnsubscribeTerminalResponse { request_id })
}

/// Fire-and-forget stdin write.
pub async fn input(session: &Session, terminal_id: &str, data_b64: &str) {
    match base64_decode(data_b64) {
        Ok(bytes) => {
            if !session.daemon.terminals.input(terminal_id, bytes).await {
                tracing::debug!(terminal_id = %terminal_id, "input to unknown or exited terminal");
            }
        }
        Err(e) => {
            tracing::debug!(terminal_id = %terminal_id, error = %e, "bad terminal input payload");
        }
    }
}

pub async fn kill(
    session: &Session,
    request_id: String,
    terminal_id: &str,
) -> Result<ServerMessage> {
    let killed = session.daemon.terminals.kill(terminal_id);
    Ok(ServerMessage::KillTerminalResponse { request_id, killed })
}
