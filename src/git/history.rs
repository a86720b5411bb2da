//! Branch history walking over a local repository.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, DiffOptions, Oid, Repository, Sort};

use crate::error::GitError;

/// A commit on a deployment branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCommit {
    pub sha: String,
    pub parents: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl BranchCommit {
    /// Create a BranchCommit from a git2 Commit, dated by its author time.
    pub fn from_git2_commit(commit: &Commit) -> Result<Self, GitError> {
        let sha = commit.id().to_string();
        let seconds = commit.author().when().seconds();
        let timestamp = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| GitError::InvalidTimestamp {
                hash: sha.clone(),
                seconds,
            })?;

        Ok(Self {
            parents: commit.parent_ids().map(|id| id.to_string()).collect(),
            message: commit.message().unwrap_or("").to_string(),
            sha,
            timestamp,
        })
    }
}

/// Bounds and filters for a branch log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Stop at the first commit committed before this.
    pub since: Option<DateTime<Utc>>,
    /// Only report commits touching this path prefix.
    pub path: Option<String>,
    /// Inspect at most this many commits.
    pub max_count: Option<usize>,
}

/// Which bound ended a branch log early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBoundary {
    Since,
    MaxCount,
}

/// Commits of one branch, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchLog {
    pub commits: Vec<BranchCommit>,
    /// `None` when the walk reached the end of the available history.
    pub stopped_at: Option<LogBoundary>,
}

/// Read access to deployment branch history.
///
/// This abstraction allows mocking repository access in tests.
#[cfg_attr(test, mockall::automock)]
pub trait CommitSource: Send + Sync {
    /// List the commits of `branch`, newest first, within the query bounds.
    fn branch_log(&self, branch: &str, query: &LogQuery) -> Result<BranchLog, GitError>;
}

/// A repository on disk holding the deployment branches.
///
/// Every call opens its own `git2::Repository`, so one instance can be shared
/// by concurrent scan workers.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    path: PathBuf,
}

impl LocalRepository {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let local = Self { path: path.into() };
        local.repo()?;
        Ok(local)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> Result<Repository, GitError> {
        Repository::open(&self.path).map_err(|source| GitError::OpenRepository {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl CommitSource for LocalRepository {
    fn branch_log(&self, branch: &str, query: &LogQuery) -> Result<BranchLog, GitError> {
        let repo = self.repo()?;
        let head = resolve_branch(&repo, branch)?;
        let walk_err = |source| GitError::RevwalkError {
            branch: branch.to_string(),
            source,
        };

        let mut revwalk = repo.revwalk().map_err(walk_err)?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(walk_err)?;
        revwalk.push(head).map_err(walk_err)?;

        let mut log = BranchLog::default();
        let mut inspected = 0usize;

        for oid_result in revwalk {
            if query.max_count.is_some_and(|max| inspected >= max) {
                log.stopped_at = Some(LogBoundary::MaxCount);
                break;
            }

            let oid = oid_result.map_err(walk_err)?;
            let commit = repo
                .find_commit(oid)
                .map_err(|source| GitError::ParseCommit {
                    sha: oid.to_string(),
                    source,
                })?;
            inspected += 1;

            // The walk is ordered by committer time; rebased commits keep an
            // older author date.
            let committed = commit.time().seconds();
            if query.since.is_some_and(|since| committed < since.timestamp()) {
                log.stopped_at = Some(LogBoundary::Since);
                break;
            }

            if let Some(path) = query.path.as_deref()
                && !touches_path(&repo, &commit, path)?
            {
                continue;
            }

            log.commits.push(BranchCommit::from_git2_commit(&commit)?);
        }

        Ok(log)
    }
}

/// Resolve a branch name to its tip, preferring a local branch over `origin`.
pub fn resolve_branch(repo: &Repository, branch: &str) -> Result<Oid, GitError> {
    let candidates = [
        format!("refs/heads/{branch}"),
        format!("refs/remotes/origin/{branch}"),
    ];

    for name in &candidates {
        if let Ok(reference) = repo.find_reference(name) {
            let commit = reference
                .peel_to_commit()
                .map_err(|source| GitError::ParseCommit {
                    sha: name.clone(),
                    source,
                })?;
            return Ok(commit.id());
        }
    }

    Err(GitError::BranchNotFound(branch.to_string()))
}

/// Whether `commit` changes anything under `path` relative to its first parent.
///
/// Root commits and commits whose parent is missing (shallow boundary) are
/// compared against the empty tree.
fn touches_path(repo: &Repository, commit: &Commit, path: &str) -> Result<bool, GitError> {
    let diff_err = |source| GitError::Diff {
        sha: commit.id().to_string(),
        source,
    };

    let tree = commit.tree().map_err(diff_err)?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree().map_err(diff_err)?),
        Err(_) => None,
    };

    let mut opts = DiffOptions::new();
    opts.pathspec(path);
    let diff = repo
        .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))
        .map_err(diff_err)?;

    Ok(diff.deltas().len() > 0)
}
