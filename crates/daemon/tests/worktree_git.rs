//! Worktree and checkout engine behavior against real git repositories.

use std::path::{Path, PathBuf};
use std::process::Command;

use paseo_daemon::worktree::{checkout, WorktreeEngine};
use paseo_domain::Error;
use paseo_protocol::types::WorktreeParams;

fn git(cwd: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawning git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A repo with one commit on `main`.
fn init_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    git(&root, &["init", "-b", "main"]);
    git(&root, &["config", "user.email", "test@example.com"]);
    git(&root, &["config", "user.name", "Test"]);
    std::fs::write(root.join("README.md"), "# project\n").unwrap();
    git(&root, &["add", "-A"]);
    git(&root, &["commit", "-m", "initial"]);
    (dir, root)
}

fn params(branch: &str, slug: &str) -> WorktreeParams {
    WorktreeParams {
        branch_name: branch.into(),
        base_branch: "main".into(),
        worktree_slug: slug.into(),
        allow_stash: false,
        setup_commands: vec![],
    }
}

#[tokio::test]
async fn create_worktree_under_paseo_dir() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    let info = engine
        .create_worktree(&root, &params("feature/wt", "fix-tests"))
        .await
        .unwrap();

    assert_eq!(
        info.worktree_path,
        root.join(".paseo/worktrees/fix-tests")
    );
    assert!(info.worktree_path.join("README.md").exists());
    assert_eq!(info.branch_name, "feature/wt");
    assert_eq!(info.repo_root, root);

    // Tracked in the engine's metadata store.
    let listed = engine.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].worktree_path, info.worktree_path);

    // Ownership check resolves the repo root.
    let check = engine.is_paseo_owned_worktree_cwd(&info.worktree_path);
    assert!(check.allowed);
    assert_eq!(check.repo_root.unwrap(), root);
}

#[tokio::test]
async fn create_worktree_rejects_existing_branch_and_bad_names() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    // Existing branch.
    git(&root, &["branch", "taken"]);
    assert!(matches!(
        engine.create_worktree(&root, &params("taken", "s1")).await,
        Err(Error::BadRequest(_))
    ));

    // Escape attempts in slug / base.
    for bad in ["../evil", "a@{1}", "has space"] {
        let mut p = params("ok-branch", bad);
        assert!(engine.create_worktree(&root, &p).await.is_err(), "{bad}");
        p = params("ok-branch", "slug");
        p.base_branch = bad.into();
        assert!(engine.create_worktree(&root, &p).await.is_err(), "{bad}");
    }
}

#[tokio::test]
async fn dirty_repo_refuses_worktree_without_stash_opt_in() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    std::fs::write(root.join("wip.txt"), "uncommitted").unwrap();
    let err = engine
        .create_worktree(&root, &params("blocked", "blocked"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAllowed(_)));
    assert!(!root.join(".paseo/worktrees/blocked").exists());
    // The dirty file was left alone.
    assert!(root.join("wip.txt").exists());
}

#[tokio::test]
async fn dirty_repo_stashes_on_explicit_opt_in() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    std::fs::write(root.join("wip.txt"), "uncommitted").unwrap();
    let mut p = params("stashed", "stashed");
    p.allow_stash = true;
    let info = engine.create_worktree(&root, &p).await.unwrap();
    assert!(info.worktree_path.exists());

    // The work moved into a stash entry rather than being dropped.
    assert!(!checkout::status(&root).await.unwrap().dirty);
    let stashes = Command::new("git")
        .args(["stash", "list"])
        .current_dir(&root)
        .output()
        .unwrap();
    let listing = String::from_utf8_lossy(&stashes.stdout).to_string();
    assert!(listing.contains("before worktree stashed"), "{listing}");
}

#[tokio::test]
async fn archive_deletes_worktree_and_branch() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    let info = engine
        .create_worktree(&root, &params("wt-branch", "doomed"))
        .await
        .unwrap();
    assert!(info.worktree_path.exists());

    engine
        .delete_paseo_worktree(&info.worktree_path)
        .await
        .unwrap();
    assert!(!info.worktree_path.exists());
    assert!(engine.list().is_empty());

    // Archiving arbitrary paths stays refused.
    assert!(matches!(
        engine.delete_paseo_worktree(Path::new("/tmp/notpaseo")).await,
        Err(Error::NotAllowed(_))
    ));
}

#[tokio::test]
async fn status_reflects_dirt_and_branch() {
    let (_repo, root) = init_repo();

    let clean = checkout::status(&root).await.unwrap();
    assert_eq!(clean.branch, "main");
    assert!(!clean.dirty);
    assert!(clean.changed_files.is_empty());

    std::fs::write(root.join("new.txt"), "hi").unwrap();
    let dirty = checkout::status(&root).await.unwrap();
    assert!(dirty.dirty);
    assert!(dirty
        .changed_files
        .iter()
        .any(|f| f.contains("new.txt")));
}

#[tokio::test]
async fn commit_uses_message_or_falls_back() {
    let (_repo, root) = init_repo();

    std::fs::write(root.join("a.txt"), "one").unwrap();
    let (message, sha) = checkout::commit(&root, Some("add a.txt".into()), None)
        .await
        .unwrap();
    assert_eq!(message, "add a.txt");
    assert_eq!(sha.len(), 40);

    // No metadata model: the empty message falls back.
    std::fs::write(root.join("b.txt"), "two").unwrap();
    let (message, _) = checkout::commit(&root, None, None).await.unwrap();
    assert_eq!(message, "Update files");

    // Nothing to commit is an error.
    assert!(checkout::commit(&root, None, None).await.is_err());
}

#[tokio::test]
async fn merge_conflict_carries_structured_payload() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    let info = engine
        .create_worktree(&root, &params("conflicting", "conflict"))
        .await
        .unwrap();

    // Diverge the same file on both sides.
    std::fs::write(info.worktree_path.join("README.md"), "worktree version\n").unwrap();
    git(&info.worktree_path, &["add", "-A"]);
    git(&info.worktree_path, &["commit", "-m", "worktree change"]);

    std::fs::write(root.join("README.md"), "main version\n").unwrap();
    git(&root, &["add", "-A"]);
    git(&root, &["commit", "-m", "main change"]);

    let err = checkout::merge(&info.worktree_path, None, true)
        .await
        .unwrap_err();
    match err {
        Error::MergeConflict { conflicts, .. } => {
            assert_eq!(conflicts, vec!["README.md"]);
        }
        other => panic!("expected merge conflict, got {other}"),
    }
    // The merge was aborted: the target stays clean.
    assert!(!checkout::status(&root).await.unwrap().dirty);
}

#[tokio::test]
async fn merge_rejects_dirty_target_when_required() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    let info = engine
        .create_worktree(&root, &params("clean-merge", "wt"))
        .await
        .unwrap();
    std::fs::write(info.worktree_path.join("feature.txt"), "new").unwrap();
    git(&info.worktree_path, &["add", "-A"]);
    git(&info.worktree_path, &["commit", "-m", "feature"]);

    // Dirty main refuses the merge under require_clean_target.
    std::fs::write(root.join("scratch.txt"), "wip").unwrap();
    assert!(matches!(
        checkout::merge(&info.worktree_path, None, true).await,
        Err(Error::NotAllowed(_))
    ));

    // Cleaned up, the merge lands.
    std::fs::remove_file(root.join("scratch.txt")).unwrap();
    checkout::merge(&info.worktree_path, None, true).await.unwrap();
    assert!(root.join("feature.txt").exists());
}

#[tokio::test]
async fn merge_from_base_brings_in_new_commits() {
    let (_repo, root) = init_repo();
    let home = tempfile::tempdir().unwrap();
    let engine = WorktreeEngine::new(home.path()).unwrap();

    let info = engine
        .create_worktree(&root, &params("behind", "wt"))
        .await
        .unwrap();

    std::fs::write(root.join("later.txt"), "later").unwrap();
    git(&root, &["add", "-A"]);
    git(&root, &["commit", "-m", "later work"]);

    assert_eq!(engine.base_branch_of(&info.worktree_path).as_deref(), Some("main"));
    checkout::merge_from_base(&info.worktree_path, "main")
        .await
        .unwrap();
    assert!(info.worktree_path.join("later.txt").exists());
}

#[tokio::test]
async fn repo_info_and_structured_diff() {
    let (_repo, root) = init_repo();

    let info = checkout::repo_info(&root).await.unwrap();
    assert_eq!(info.branch, "main");
    assert_eq!(info.repo_root.file_name(), root.file_name());
    assert!(info.upstream.is_none());

    std::fs::write(root.join("README.md"), "# project\nmore\n").unwrap();
    let files = checkout::structured_diff(&root).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "README.md");
    assert_eq!(files[0].additions, 1);
    assert!(files[0].patch.contains("+more"));
}

#[tokio::test]
async fn status_outside_a_repo_is_not_git_repo() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        checkout::status(dir.path()).await,
        Err(Error::NotGitRepo(_))
    ));
}
