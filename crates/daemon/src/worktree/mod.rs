//! Worktree engine: creation, ownership checks, archiving, and tracking
//! metadata for paseo-owned worktrees.
//!
//! A paseo-owned worktree lives under `<repoRoot>/.paseo/worktrees/<slug>`
//! (or under the daemon's own worktree root). Archive operations refuse any
//! path outside that set.

pub mod checkout;
pub mod git;
pub mod setup;

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use paseo_domain::{Error, Result};
use paseo_protocol::types::{PaseoWorktreeInfo, WorktreeParams};

/// Directory (relative to a repo root) that holds paseo-owned worktrees.
pub const WORKTREES_SUBDIR: &str = ".paseo/worktrees";

/// Result of an ownership check.
#[derive(Debug, Clone)]
pub struct OwnershipCheck {
    pub allowed: bool,
    pub repo_root: Option<PathBuf>,
}

impl OwnershipCheck {
    fn denied() -> Self {
        Self {
            allowed: false,
            repo_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorktreeRecord {
    worktree_path: PathBuf,
    branch_name: String,
    base_branch: String,
    repo_root: PathBuf,
    created_at: chrono::DateTime<Utc>,
}

impl WorktreeRecord {
    fn info(&self) -> PaseoWorktreeInfo {
        PaseoWorktreeInfo {
            worktree_path: self.worktree_path.clone(),
            branch_name: self.branch_name.clone(),
            repo_root: self.repo_root.clone(),
            created_at: self.created_at,
        }
    }
}

pub struct WorktreeEngine {
    /// Tracking metadata directory (`paseoHome/worktrees`).
    store_dir: PathBuf,
    /// The daemon's own worktree root (`paseoHome/worktrees` checkouts are
    /// also paseo-owned).
    paseo_home: PathBuf,
}

impl WorktreeEngine {
    pub fn new(paseo_home: &Path) -> Result<Self> {
        let store_dir = paseo_home.join("worktrees");
        std::fs::create_dir_all(&store_dir)?;
        Ok(Self {
            store_dir,
            paseo_home: paseo_home.to_path_buf(),
        })
    }

    fn record_path(&self, worktree_path: &Path) -> PathBuf {
        let digest = Sha256::digest(worktree_path.as_os_str().as_encoded_bytes());
        self.store_dir.join(format!("{}.json", &hex::encode(digest)[..16]))
    }

    /// Create `<repoRoot>/.paseo/worktrees/<slug>` on `branch_name` forked
    /// from `base_branch`.
    pub async fn create_worktree(
        &self,
        cwd: &Path,
        params: &WorktreeParams,
    ) -> Result<PaseoWorktreeInfo> {
        git::validate_ref_component(&params.branch_name, "branch name")?;
        git::validate_ref_component(&params.base_branch, "base branch")?;
        git::validate_ref_component(&params.worktree_slug, "worktree slug")?;
        if params.worktree_slug.contains('/') {
            return Err(Error::BadRequest("worktree slug must be a single path segment".into()));
        }

        let repo_root = git::owning_repo_root(cwd).await?;

        // A dirty repo either refuses the operation or stashes on explicit
        // opt-in; it never proceeds silently.
        if git::is_dirty(&repo_root).await? {
            if !params.allow_stash {
                return Err(Error::NotAllowed(format!(
                    "repository at {} has uncommitted changes; commit them or set allow_stash",
                    repo_root.display()
                )));
            }
            git::git(
                &repo_root,
                &[
                    "stash",
                    "push",
                    "--include-untracked",
                    "-m",
                    &format!("paseo: before worktree {}", params.worktree_slug),
                ],
            )
            .await?;
            tracing::info!(
                repo_root = %repo_root.display(),
                slug = %params.worktree_slug,
                "stashed uncommitted changes before worktree creation"
            );
        }

        if git::branch_exists(&repo_root, &params.branch_name).await? {
            return Err(Error::BadRequest(format!(
                "branch '{}' already exists",
                params.branch_name
            )));
        }

        let worktree_path = repo_root.join(WORKTREES_SUBDIR).join(&params.worktree_slug);
        if worktree_path.exists() {
            return Err(Error::BadRequest(format!(
                "worktree path already exists: {}",
                worktree_path.display()
            )));
        }
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        git::git(
            &repo_root,
            &[
                "worktree",
                "add",
                "-b",
                &params.branch_name,
                worktree_path.to_str().ok_or_else(|| {
                    Error::BadRequest("worktree path is not valid UTF-8".into())
                })?,
                &params.base_branch,
            ],
        )
        .await?;

        let record = WorktreeRecord {
            worktree_path: worktree_path.clone(),
            branch_name: params.branch_name.clone(),
            base_branch: params.base_branch.clone(),
            repo_root,
            created_at: Utc::now(),
        };
        self.persist(&record)?;

        tracing::info!(
            worktree = %worktree_path.display(),
            branch = %params.branch_name,
            base = %params.base_branch,
            "worktree created"
        );
        Ok(record.info())
    }

    fn persist(&self, record: &WorktreeRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(&record.worktree_path);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_record(&self, worktree_path: &Path) -> Option<WorktreeRecord> {
        let raw = std::fs::read_to_string(self.record_path(worktree_path)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// The base branch recorded for a worktree, when it is paseo-owned.
    pub fn base_branch_of(&self, worktree_path: &Path) -> Option<String> {
        self.load_record(worktree_path).map(|r| r.base_branch)
    }

    pub fn list(&self) -> Vec<PaseoWorktreeInfo> {
        let Ok(entries) = std::fs::read_dir(&self.store_dir) else {
            return Vec::new();
        };
        let mut out: Vec<PaseoWorktreeInfo> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| {
                let raw = std::fs::read_to_string(e.path()).ok()?;
                serde_json::from_str::<WorktreeRecord>(&raw).ok()
            })
            .map(|r| r.info())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Whether `path` is a paseo-owned worktree cwd. Allowed paths sit
    /// strictly below some `<repoRoot>/.paseo/worktrees/` (the repo root is
    /// derived from the path) or below the daemon's own worktree root (the
    /// repo root then comes from tracking metadata).
    pub fn is_paseo_owned_worktree_cwd(&self, path: &Path) -> OwnershipCheck {
        if !path.is_absolute() {
            return OwnershipCheck::denied();
        }
        let normalized = normalize(path);

        // Structural check: .../<repoRoot>/.paseo/worktrees/<slug>[/...]
        let components: Vec<&std::ffi::OsStr> = normalized
            .components()
            .filter_map(|c| match c {
                Component::Normal(os) => Some(os),
                _ => None,
            })
            .collect();
        for window_end in 2..components.len() {
            if components[window_end - 2] == ".paseo" && components[window_end - 1] == "worktrees"
            {
                // Needs at least a slug below the worktrees dir.
                if window_end < components.len() {
                    let mut root = PathBuf::from("/");
                    for comp in &components[..window_end - 2] {
                        root.push(comp);
                    }
                    return OwnershipCheck {
                        allowed: true,
                        repo_root: Some(root),
                    };
                }
            }
        }

        // Daemon-home worktrees resolve their repo root from metadata.
        let home_root = normalize(&self.paseo_home.join("worktrees"));
        if normalized.starts_with(&home_root) && normalized != home_root {
            if let Some(record) = self.load_record(&normalized) {
                return OwnershipCheck {
                    allowed: true,
                    repo_root: Some(record.repo_root),
                };
            }
        }

        OwnershipCheck::denied()
    }

    /// Remove a paseo-owned worktree and its branch. Callers must have
    /// verified ownership and closed resident agents first.
    pub async fn delete_paseo_worktree(&self, worktree_path: &Path) -> Result<()> {
        let check = self.is_paseo_owned_worktree_cwd(worktree_path);
        let repo_root = match (check.allowed, check.repo_root) {
            (true, Some(root)) => root,
            _ => {
                return Err(Error::NotAllowed(format!(
                    "not a paseo-owned worktree: {}",
                    worktree_path.display()
                )))
            }
        };

        let record = self.load_record(worktree_path);

        git::git(
            &repo_root,
            &[
                "worktree",
                "remove",
                "--force",
                worktree_path.to_str().ok_or_else(|| {
                    Error::BadRequest("worktree path is not valid UTF-8".into())
                })?,
            ],
        )
        .await?;

        if let Some(record) = &record {
            // Branch removal is best-effort: merged work may keep it alive.
            let _ = git::git_check(&repo_root, &["branch", "-D", &record.branch_name]).await;
        }
        let _ = std::fs::remove_file(self.record_path(worktree_path));

        tracing::info!(worktree = %worktree_path.display(), "worktree archived");
        Ok(())
    }
}

/// Lexically normalize a path (resolve `.` and `..` components) without
/// touching the filesystem, so ownership checks work on deleted paths too.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, WorktreeEngine) {
        let home = tempfile::tempdir().unwrap();
        let engine = WorktreeEngine::new(home.path()).unwrap();
        (home, engine)
    }

    #[test]
    fn ownership_allows_repo_scoped_worktrees() {
        let (_home, engine) = engine();
        let check = engine
            .is_paseo_owned_worktree_cwd(Path::new("/work/repo/.paseo/worktrees/fix-tests"));
        assert!(check.allowed);
        assert_eq!(check.repo_root.unwrap(), PathBuf::from("/work/repo"));

        // Deep cwd inside the worktree is still owned.
        let check = engine.is_paseo_owned_worktree_cwd(Path::new(
            "/work/repo/.paseo/worktrees/fix-tests/src/nested",
        ));
        assert!(check.allowed);
        assert_eq!(check.repo_root.unwrap(), PathBuf::from("/work/repo"));
    }

    #[test]
    fn ownership_denies_outside_paths() {
        let (_home, engine) = engine();
        for path in [
            "/tmp/notpaseo",
            "/work/repo/src",
            "/work/repo/.paseo/worktrees", // the root itself, no slug
            "relative/path",
        ] {
            assert!(
                !engine.is_paseo_owned_worktree_cwd(Path::new(path)).allowed,
                "{path}"
            );
        }
    }

    #[test]
    fn ownership_rejects_dotdot_escape() {
        let (_home, engine) = engine();
        let check = engine.is_paseo_owned_worktree_cwd(Path::new(
            "/work/repo/.paseo/worktrees/../../../etc",
        ));
        assert!(!check.allowed);
    }

    #[test]
    fn delete_refuses_unowned_path() {
        let (_home, engine) = engine();
        let err = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(engine.delete_paseo_worktree(Path::new("/tmp/notpaseo")))
            .unwrap_err();
        assert!(matches!(err, Error::NotAllowed(_)));
    }
}
