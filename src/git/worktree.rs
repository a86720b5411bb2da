//! Isolated working copies of deployment branches.
//!
//! Working-copy creation against one repository is serialized through a
//! named lock keyed by the repository path. The lock is held only while the
//! worktree is being set up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use git2::{BranchType, Oid, Repository, WorktreeAddOptions, WorktreePruneOptions};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::GitError;

static WORKTREE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// The lock guarding worktree creation for the repository at `repo_path`.
///
/// Paths are canonicalized so that different spellings of the same
/// repository share one lock.
pub fn worktree_lock(repo_path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let key = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());
    let mut locks = WORKTREE_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(key).or_default().clone()
}

/// Make sure `refs/heads/<branch>` exists, creating it from `origin/<branch>`.
pub fn ensure_local_branch(repo: &Repository, branch: &str) -> Result<(), GitError> {
    if repo.find_branch(branch, BranchType::Local).is_ok() {
        return Ok(());
    }

    let upstream = format!("origin/{branch}");
    let remote = repo
        .find_branch(&upstream, BranchType::Remote)
        .map_err(|_| GitError::BranchNotFound(branch.to_string()))?;
    let commit = remote
        .get()
        .peel_to_commit()
        .map_err(|source| GitError::ParseCommit {
            sha: upstream.clone(),
            source,
        })?;

    let mut local = repo
        .branch(branch, &commit, false)
        .map_err(|e| worktree_err(branch, e))?;
    local
        .set_upstream(Some(&upstream))
        .map_err(|e| worktree_err(branch, e))?;

    debug!("Created local branch {} from {}", branch, upstream);
    Ok(())
}

/// A temporary location for a branch worktree.
///
/// The directory is removed when the value is dropped; the worktree
/// registration must be removed separately.
#[derive(Debug)]
pub struct WorkingCopy {
    _root: TempDir,
    pub path: PathBuf,
    pub name: String,
    pub branch: String,
}

impl WorkingCopy {
    /// Reserve a fresh, not-yet-existing worktree path for `branch`.
    pub fn reserve(branch: &str) -> Result<Self, GitError> {
        let sanitized = branch.replace('/', "-");
        let root = tempfile::Builder::new()
            .prefix(&format!("rewind-{sanitized}-"))
            .tempdir()
            .map_err(GitError::Io)?;

        let suffix = root
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("rewind-{sanitized}"));

        Ok(Self {
            path: root.path().join("worktree"),
            name: suffix,
            branch: branch.to_string(),
            _root: root,
        })
    }

    /// Register the worktree through libgit2 and open it.
    pub fn add(&self, repo: &Repository) -> Result<Repository, GitError> {
        ensure_local_branch(repo, &self.branch)?;

        let reference = repo
            .find_reference(&format!("refs/heads/{}", self.branch))
            .map_err(|e| worktree_err(&self.branch, e))?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));

        let worktree = repo
            .worktree(&self.name, &self.path, Some(&opts))
            .map_err(|e| worktree_err(&self.branch, e))?;

        Repository::open_from_worktree(&worktree).map_err(|e| worktree_err(&self.branch, e))
    }

    /// Unregister a worktree created by [`WorkingCopy::add`].
    pub fn prune(&self, repo: &Repository) {
        let result = repo.find_worktree(&self.name).and_then(|worktree| {
            worktree.prune(Some(
                WorktreePruneOptions::new().valid(true).working_tree(true),
            ))
        });

        if let Err(e) = result {
            warn!("Failed to prune worktree {}: {}", self.name, e);
        }
    }
}

/// Current tip of the local branch.
pub fn branch_tip(repo: &Repository, branch: &str) -> Result<Oid, GitError> {
    repo.refname_to_id(&format!("refs/heads/{branch}"))
        .map_err(|_| GitError::BranchNotFound(branch.to_string()))
}

/// Move the local branch back to `tip`, discarding commits made after it.
pub fn restore_branch(repo: &Repository, branch: &str, tip: Oid) -> Result<(), GitError> {
    repo.reference(
        &format!("refs/heads/{branch}"),
        tip,
        true,
        "rewind: restore after failed revert",
    )
    .map(|_| ())
    .map_err(|e| worktree_err(branch, e))
}

fn worktree_err(branch: &str, e: git2::Error) -> GitError {
    GitError::Worktree {
        branch: branch.to_string(),
        reason: e.message().to_string(),
    }
}
