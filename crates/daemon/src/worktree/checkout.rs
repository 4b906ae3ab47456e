//! Checkout operations: status, diff, commit, merge, push, and pull
//! requests. All of them shell out to `git` (and `gh` for PRs) in the
//! agent's working directory.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Command;

use paseo_domain::{Error, Result};
use paseo_protocol::types::{CheckoutStatus, DiffFile, GitRepoInfo, PrStatus};
use paseo_providers::MetadataModel;

use super::git;

const COMMIT_FALLBACK_MESSAGE: &str = "Update files";
const COMMIT_SYSTEM_PROMPT: &str =
    "Write a one-line git commit message (max 72 chars) for these changes. Reply with the message only.";
const PR_SYSTEM_PROMPT: &str = "Write a pull request title (first line, max 72 chars) and body \
(after a blank line) for these commits. Reply with title and body only.";

pub async fn status(cwd: &Path) -> Result<CheckoutStatus> {
    let branch = git::current_branch(cwd).await?;
    let porcelain = git::git(cwd, &["status", "--porcelain"]).await?;
    let changed_files: Vec<String> = porcelain
        .lines()
        .filter_map(|l| l.get(3..).map(str::to_string))
        .collect();
    let (ahead, behind) = git::ahead_behind(cwd).await?;
    let upstream = git::upstream(cwd).await?;

    Ok(CheckoutStatus {
        branch,
        dirty: !changed_files.is_empty(),
        changed_files,
        ahead,
        behind,
        upstream,
    })
}

pub async fn diff(cwd: &Path, base: Option<&str>) -> Result<String> {
    match base {
        Some(base) => {
            git::validate_ref_component(base, "base ref")?;
            git::git(cwd, &["diff", &format!("{base}...HEAD")]).await
        }
        None => git::git(cwd, &["diff", "HEAD"]).await,
    }
}

pub async fn repo_info(cwd: &Path) -> Result<GitRepoInfo> {
    let repo_root = git::toplevel(cwd).await?;
    let branch = git::current_branch(cwd).await?;
    let dirty = git::is_dirty(cwd).await?;
    let (ahead, behind) = git::ahead_behind(cwd).await?;
    let upstream = git::upstream(cwd).await?;
    Ok(GitRepoInfo {
        repo_root,
        branch,
        dirty,
        ahead,
        behind,
        upstream,
    })
}

/// Stage everything and commit. An empty message is auto-generated from the
/// diffstat via the metadata model, falling back to a fixed message.
pub async fn commit(
    cwd: &Path,
    message: Option<String>,
    metadata: Option<Arc<MetadataModel>>,
) -> Result<(String, String)> {
    if !git::is_dirty(cwd).await? {
        return Err(Error::BadRequest("nothing to commit".into()));
    }

    let message = match message.filter(|m| !m.trim().is_empty()) {
        Some(m) => m,
        None => generate_commit_message(cwd, metadata).await,
    };

    git::git(cwd, &["add", "-A"]).await?;
    git::git(cwd, &["commit", "-m", &message]).await?;
    let sha = git::git(cwd, &["rev-parse", "HEAD"]).await?;
    Ok((message, sha))
}

async fn generate_commit_message(cwd: &Path, metadata: Option<Arc<MetadataModel>>) -> String {
    let Some(model) = metadata else {
        return COMMIT_FALLBACK_MESSAGE.to_string();
    };
    let stat = git::git(cwd, &["diff", "--stat", "HEAD"])
        .await
        .unwrap_or_default();
    match model.generate(COMMIT_SYSTEM_PROMPT, &stat).await {
        Ok(msg) => {
            let line = msg.lines().next().unwrap_or("").trim().to_string();
            if line.is_empty() {
                COMMIT_FALLBACK_MESSAGE.to_string()
            } else {
                line
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "commit message generation failed");
            COMMIT_FALLBACK_MESSAGE.to_string()
        }
    }
}

/// Merge the checkout's branch into a target branch at the owning repo
/// root. Conflicts abort the merge and surface a structured payload.
pub async fn merge(
    cwd: &Path,
    target_branch: Option<&str>,
    require_clean_target: bool,
) -> Result<()> {
    let source_branch = git::current_branch(cwd).await?;
    let repo_root = git::owning_repo_root(cwd).await?;

    if require_clean_target && git::is_dirty(&repo_root).await? {
        return Err(Error::NotAllowed("target checkout is dirty".into()));
    }
    if let Some(target) = target_branch {
        git::validate_ref_component(target, "target branch")?;
        let current = git::current_branch(&repo_root).await?;
        if current != target {
            git::git(&repo_root, &["checkout", target]).await?;
        }
    }

    merge_into(&repo_root, &source_branch).await
}

/// Merge the base branch into the worktree checkout.
pub async fn merge_from_base(cwd: &Path, base_branch: &str) -> Result<()> {
    git::validate_ref_component(base_branch, "base branch")?;
    merge_into(cwd, base_branch).await
}

async fn merge_into(cwd: &Path, branch: &str) -> Result<()> {
    if git::git_check(cwd, &["merge", "--no-edit", branch]).await? {
        return Ok(());
    }
    let conflicts = git::git(cwd, &["diff", "--name-only", "--diff-filter=U"])
        .await
        .unwrap_or_default();
    let conflicts: Vec<String> = conflicts.lines().map(str::to_string).collect();
    let _ = git::git_check(cwd, &["merge", "--abort"]).await;

    if conflicts.is_empty() {
        Err(Error::Internal(format!("merge of '{branch}' failed")))
    } else {
        Err(Error::MergeConflict {
            message: format!(
                "merging '{branch}' produced {} conflicted file(s)",
                conflicts.len()
            ),
            conflicts,
        })
    }
}

/// Push the current branch, setting upstream tracking when absent.
pub async fn push(cwd: &Path) -> Result<()> {
    if git::upstream(cwd).await?.is_some() {
        git::git(cwd, &["push"]).await?;
    } else {
        let branch = git::current_branch(cwd).await?;
        git::git(cwd, &["push", "-u", "origin", &branch]).await?;
    }
    Ok(())
}

/// Create a pull request via `gh`. Uncommitted work is an error — no
/// implicit commit.
pub async fn pr_create(
    cwd: &Path,
    title: Option<String>,
    body: Option<String>,
    metadata: Option<Arc<MetadataModel>>,
) -> Result<String> {
    if git::is_dirty(cwd).await? {
        return Err(Error::NotAllowed(
            "uncommitted changes; commit before creating a PR".into(),
        ));
    }

    let (title, body) = match title.filter(|t| !t.trim().is_empty()) {
        Some(t) => (t, body.unwrap_or_default()),
        None => generate_pr_text(cwd, metadata).await?,
    };

    let output = Command::new("gh")
        .args(["pr", "create", "--title", &title, "--body", &body])
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| Error::Internal(format!("spawning gh: {e}")))?;

    if !output.status.success() {
        return Err(Error::Internal(format!(
            "gh pr create failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .rev()
        .find(|l| l.starts_with("http"))
        .unwrap_or_default()
        .to_string())
}

async fn generate_pr_text(
    cwd: &Path,
    metadata: Option<Arc<MetadataModel>>,
) -> Result<(String, String)> {
    let log = git::git(cwd, &["log", "--oneline", "-20"]).await.unwrap_or_default();
    let first_subject = log
        .lines()
        .next()
        .and_then(|l| l.split_once(' ').map(|(_, s)| s.to_string()))
        .unwrap_or_else(|| "Changes".to_string());

    let Some(model) = metadata else {
        return Ok((first_subject, String::new()));
    };
    match model.generate(PR_SYSTEM_PROMPT, &log).await {
        Ok(text) => {
            let mut lines = text.lines();
            let title = lines.next().unwrap_or(&first_subject).trim().to_string();
            let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            Ok((if title.is_empty() { first_subject } else { title }, body))
        }
        Err(e) => {
            tracing::debug!(error = %e, "PR text generation failed");
            Ok((first_subject, String::new()))
        }
    }
}

#[derive(Deserialize)]
struct GhPrView {
    state: String,
    url: String,
    title: Option<String>,
}

pub async fn pr_status(cwd: &Path) -> Result<PrStatus> {
    let output = Command::new("gh")
        .args(["pr", "view", "--json", "state,url,title"])
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| Error::Internal(format!("spawning gh: {e}")))?;

    if !output.status.success() {
        return Err(Error::Internal(format!(
            "gh pr view failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: GhPrView = serde_json::from_slice(&output.stdout)?;
    Ok(PrStatus {
        state: parsed.state,
        url: parsed.url,
        title: parsed.title,
    })
}

/// Structured per-file diff with hunk counts.
pub async fn structured_diff(cwd: &Path) -> Result<Vec<DiffFile>> {
    let numstat = git::git(cwd, &["diff", "--numstat", "HEAD"]).await?;
    let mut files = Vec::new();
    for line in numstat.lines() {
        let mut parts = line.split('\t');
        let additions = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let deletions = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let Some(path) = parts.next() else { continue };

        // Renames come through as "old => new" style paths.
        let (old_path, path) = match path.split_once(" => ") {
            Some((old, new)) => (Some(old.to_string()), new.to_string()),
            None => (None, path.to_string()),
        };

        let patch = git::git(cwd, &["diff", "HEAD", "--", &path])
            .await
            .unwrap_or_default();
        files.push(DiffFile {
            path,
            old_path,
            additions,
            deletions,
            patch,
        });
    }
    Ok(files)
}
