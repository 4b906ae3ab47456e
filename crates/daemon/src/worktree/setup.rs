//! Worktree setup commands.
//!
//! The user's configured setup commands run sequentially inside a fresh
//! worktree. Progress streams to the agent timeline as a single
//! `paseo_worktree_setup` tool call (`running → completed | failed`).
//! Cancellation escalates SIGTERM → SIGKILL after a grace period.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use paseo_domain::timeline::{TimelineItem, ToolCallStatus};
use paseo_domain::Result;
use paseo_protocol::types::SetupCommandResult;

use crate::agents::AgentManager;

const KILL_GRACE: Duration = Duration::from_secs(5);

/// Run setup commands in `worktree`, streaming progress to `agent_id`'s
/// timeline. Returns the per-command results; a non-zero exit stops the
/// sequence. Failure never deletes the worktree here — that is the
/// caller's opt-in.
pub async fn run_worktree_setup_commands(
    manager: &Arc<AgentManager>,
    agent_id: &str,
    worktree: &Path,
    commands: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<SetupCommandResult>> {
    if commands.is_empty() {
        return Ok(Vec::new());
    }

    let call_id = format!("setup-{}", uuid::Uuid::new_v4());
    manager.append_timeline_item(
        agent_id,
        TimelineItem::ToolCall {
            call_id: call_id.clone(),
            name: "paseo_worktree_setup".into(),
            status: ToolCallStatus::Running,
            input: serde_json::json!({
                "cwd": worktree,
                "commands": commands,
            }),
            output: None,
            error: None,
            at: Utc::now(),
        },
    )?;

    let mut results: Vec<SetupCommandResult> = Vec::with_capacity(commands.len());
    let mut failed = false;

    for command in commands {
        if cancel.is_cancelled() {
            failed = true;
            break;
        }
        let result = run_one(worktree, command, cancel).await;
        let ok = result.exit_code == Some(0);
        results.push(result);
        if !ok {
            failed = true;
            break;
        }
    }

    let output = serde_json::to_value(&results)?;
    let (status, error) = if failed {
        let reason = if cancel.is_cancelled() {
            "cancelled".to_string()
        } else {
            results
                .last()
                .map(|r| format!("'{}' exited with {:?}", r.command, r.exit_code))
                .unwrap_or_else(|| "setup failed".into())
        };
        (ToolCallStatus::Failed, Some(reason))
    } else {
        (ToolCallStatus::Completed, None)
    };
    manager.update_timeline_tool_call(agent_id, &call_id, status, Some(output), error)?;

    Ok(results)
}

async fn run_one(cwd: &Path, command: &str, cancel: &CancellationToken) -> SetupCommandResult {
    tracing::info!(cwd = %cwd.display(), command = %command, "running setup command");

    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(c) => c,
        Err(e) => {
            return SetupCommandResult {
                command: command.to_string(),
                cwd: cwd.to_path_buf(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!("spawn failed: {e}"),
            }
        }
    };

    let pid = child.id();
    let mut wait = Box::pin(child.wait_with_output());
    let output = tokio::select! {
        out = &mut wait => out.ok(),
        _ = cancel.cancelled() => {
            // SIGTERM first; SIGKILL after the grace period.
            if let Some(pid) = pid {
                let _ = Command::new("kill")
                    .args(["-TERM", &pid.to_string()])
                    .output()
                    .await;
            }
            match tokio::time::timeout(KILL_GRACE, &mut wait).await {
                Ok(out) => out.ok(),
                Err(_) => {
                    if let Some(pid) = pid {
                        let _ = Command::new("kill")
                            .args(["-KILL", &pid.to_string()])
                            .output()
                            .await;
                    }
                    tokio::time::timeout(Duration::from_secs(1), &mut wait)
                        .await
                        .ok()
                        .and_then(|out| out.ok())
                }
            }
        }
    };

    match output {
        Some(out) => SetupCommandResult {
            command: command.to_string(),
            cwd: cwd.to_path_buf(),
            exit_code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        },
        None => SetupCommandResult {
            command: command.to_string(),
            cwd: cwd.to_path_buf(),
            exit_code: None,
            stdout: String::new(),
            stderr: "terminated".into(),
        },
    }
}
