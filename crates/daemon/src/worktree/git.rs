//! Git subprocess helpers shared by the worktree and checkout engines.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;

use paseo_domain::{Error, Result};

/// Run git in `cwd`, capturing output. Spawn failures and non-zero exits
/// both surface as errors; "not a git repository" gets its own kind.
pub async fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = raw_git(cwd, args).await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    } else {
        Err(map_git_failure(cwd, args, &output))
    }
}

/// Run git and only report whether it succeeded.
pub async fn git_check(cwd: &Path, args: &[&str]) -> Result<bool> {
    let output = raw_git(cwd, args).await?;
    Ok(output.status.success())
}

async fn raw_git(cwd: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| Error::Internal(format!("spawning git: {e}")))
}

fn map_git_failure(cwd: &Path, args: &[&str], output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("not a git repository") {
        Error::NotGitRepo(cwd.display().to_string())
    } else {
        Error::Internal(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        ))
    }
}

/// Toplevel of the checkout containing `cwd` (for a worktree, the worktree
/// itself).
pub async fn toplevel(cwd: &Path) -> Result<PathBuf> {
    git(cwd, &["rev-parse", "--show-toplevel"]).await.map(PathBuf::from)
}

/// Root of the owning repository: the parent of the common git dir. For a
/// linked worktree this is the main checkout, not the worktree.
pub async fn owning_repo_root(cwd: &Path) -> Result<PathBuf> {
    let common = git(cwd, &["rev-parse", "--path-format=absolute", "--git-common-dir"]).await?;
    let common = PathBuf::from(common);
    common
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::NotGitRepo(cwd.display().to_string()))
}

pub async fn current_branch(cwd: &Path) -> Result<String> {
    git(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

pub async fn is_dirty(cwd: &Path) -> Result<bool> {
    let status = git(cwd, &["status", "--porcelain"]).await?;
    Ok(!status.is_empty())
}

pub async fn branch_exists(cwd: &Path, branch: &str) -> Result<bool> {
    git_check(
        cwd,
        &[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ],
    )
    .await
}

/// Upstream ref of HEAD, if one is configured.
pub async fn upstream(cwd: &Path) -> Result<Option<String>> {
    let output = raw_git(
        cwd,
        &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
    )
    .await?;
    if output.status.success() {
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    } else {
        Ok(None)
    }
}

/// `(ahead, behind)` relative to upstream; zeros without an upstream.
pub async fn ahead_behind(cwd: &Path) -> Result<(u32, u32)> {
    if upstream(cwd).await?.is_none() {
        return Ok((0, 0));
    }
    let counts = git(cwd, &["rev-list", "--left-right", "--count", "HEAD...@{u}"]).await?;
    let mut parts = counts.split_whitespace();
    let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok((ahead, behind))
}

/// Validate a branch name, base ref, or worktree slug: the allowed charset
/// plus no `..` and no `@{`.
pub fn validate_ref_component(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::BadRequest(format!("{what} is empty")));
    }
    let charset_ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'));
    if !charset_ok || value.contains("..") || value.contains("@{") {
        return Err(Error::BadRequest(format!("invalid {what}: '{value}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_validation_accepts_sane_names() {
        for ok in ["main", "feature/dialer-race", "v1.2.3", "fix_thing", "a-b"] {
            assert!(validate_ref_component(ok, "branch").is_ok(), "{ok}");
        }
    }

    #[test]
    fn ref_validation_rejects_escapes() {
        for bad in ["", "../etc", "a..b", "a@{1}", "has space", "semi;colon", "tick`"] {
            assert!(validate_ref_component(bad, "branch").is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn toplevel_outside_repo_is_not_git_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = toplevel(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NotGitRepo(_)));
    }
}
