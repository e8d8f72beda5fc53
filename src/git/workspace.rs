//! Read-only queries against the working tree.
//!
//! Mutating git commands go through the PTY runner so the operator sees
//! them; the quick lookups the engine needs to make decisions run here as
//! plain captured subprocesses.

use crate::error::GitError;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Queries the release engine makes about the working tree
pub trait Workspace: Send + Sync {
    /// Directory commands run in
    fn work_dir(&self) -> &Path;

    /// Top-level directory of the git project
    fn project_root(&self) -> impl Future<Output = Result<PathBuf, GitError>> + Send;

    /// Whether there are no staged, unstaged or untracked changes
    fn is_clean(&self) -> impl Future<Output = Result<bool, GitError>> + Send;

    /// Whether `branch` exists on `remote`
    fn remote_branch_exists(
        &self,
        remote: &str,
        branch: &str,
    ) -> impl Future<Output = Result<bool, GitError>> + Send;

    /// Titles of the most recent `count` commits reachable from `rev`, newest first
    fn recent_commit_titles(
        &self,
        rev: &str,
        count: usize,
    ) -> impl Future<Output = Result<Vec<String>, GitError>> + Send;

    /// Every file path in the tree of `rev`
    fn list_files(&self, rev: &str) -> impl Future<Output = Result<Vec<String>, GitError>> + Send;
}

/// Resolve the git directory, following a `gitdir:` file for linked worktrees
pub fn git_dir(work_dir: &Path) -> PathBuf {
    let dot_git = work_dir.join(".git");
    if dot_git.is_file()
        && let Ok(contents) = std::fs::read_to_string(&dot_git)
        && let Some(target) = contents.trim().strip_prefix("gitdir:")
    {
        let target = PathBuf::from(target.trim());
        return if target.is_absolute() {
            target
        } else {
            work_dir.join(target)
        };
    }
    dot_git
}

/// Structural merge-conflict check: git leaves `MERGE_HEAD` behind while a
/// merge is stopped. Rebase and cherry-pick conflicts are not detected.
pub fn merge_in_progress(work_dir: &Path) -> bool {
    git_dir(work_dir).join("MERGE_HEAD").exists()
}

/// [`Workspace`] backed by the system `git` binary
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    work_dir: PathBuf,
}

impl GitWorkspace {
    /// Query the repository at `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        log::debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl Workspace for GitWorkspace {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn project_root(&self) -> Result<PathBuf, GitError> {
        let out = self.git(&["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(out.trim()))
    }

    async fn is_clean(&self) -> Result<bool, GitError> {
        let out = self.git(&["status", "--porcelain"]).await?;
        Ok(out.trim().is_empty())
    }

    async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, GitError> {
        let out = self.git(&["ls-remote", "--heads", remote, branch]).await?;
        Ok(!out.trim().is_empty())
    }

    async fn recent_commit_titles(&self, rev: &str, count: usize) -> Result<Vec<String>, GitError> {
        let count = count.to_string();
        let out = self
            .git(&["log", "-n", &count, "--format=%s", rev, "--"])
            .await?;
        Ok(non_empty_lines(&out))
    }

    async fn list_files(&self, rev: &str) -> Result<Vec<String>, GitError> {
        let out = self
            .git(&["-c", "core.quotePath=false", "ls-tree", "-r", "--name-only", rev])
            .await?;
        Ok(non_empty_lines(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_marker_in_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(!merge_in_progress(dir.path()));
        std::fs::write(dir.path().join(".git/MERGE_HEAD"), "abc\n").unwrap();
        assert!(merge_in_progress(dir.path()));
    }

    #[test]
    fn test_merge_marker_follows_gitdir_file() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real-git");
        std::fs::create_dir(&real).unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir(&tree).unwrap();
        std::fs::write(tree.join(".git"), format!("gitdir: {}\n", real.display())).unwrap();
        std::fs::write(real.join("MERGE_HEAD"), "abc\n").unwrap();
        assert!(merge_in_progress(&tree));
    }

    #[tokio::test]
    async fn test_git_workspace_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ws = GitWorkspace::new(dir.path());
        if let Err(err) = ws.project_root().await {
            assert!(matches!(
                err,
                GitError::CommandFailed { .. } | GitError::Spawn(_)
            ));
        }
    }
}
