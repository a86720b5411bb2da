//! Error types for rewind modules using thiserror.

use thiserror::Error;

/// Errors from repository transport operations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to open repository at {path}: {source}")]
    OpenRepository {
        path: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("Branch '{0}' not found locally or on origin")]
    BranchNotFound(String),

    #[error("Failed to read commit {sha}: {source}")]
    ParseCommit {
        sha: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to walk history of '{branch}': {source}")]
    RevwalkError {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to diff commit {sha}: {source}")]
    Diff {
        sha: String,
        #[source]
        source: git2::Error,
    },

    #[error("Commit {hash} has invalid timestamp (seconds={seconds})")]
    InvalidTimestamp { hash: String, seconds: i64 },

    #[error("Clone depth {0} is too large")]
    InvalidDepth(u32),

    #[error("Failed to create working copy for '{branch}': {reason}")]
    Worktree { branch: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// Errors from GitHub API operations.
#[derive(Error, Debug)]
pub enum GitHubError {
    #[error(
        "GitHub authentication failed: no valid auth found. Run 'gh auth login' or set GITHUB_TOKEN environment variable"
    )]
    AuthenticationFailed,

    #[error("GitHub API call '{operation}' failed: {source}")]
    Api {
        operation: String,
        #[source]
        source: Box<octocrab::Error>,
    },

    #[error("Rate limited by GitHub API. Resets at: {reset_time}")]
    RateLimited { reset_time: String },

    #[error("Repository not found: {owner}/{repo}")]
    RepositoryNotFound { owner: String, repo: String },

    #[error("Failed to parse repository URL")]
    InvalidRepositoryUrl,

    #[error("Force-cancel of workflow run {run_id} was rejected with HTTP {status}")]
    CancelRejected { run_id: u64, status: u16 },

    #[error("Disabling workflow {workflow_id} was rejected with HTTP {status}")]
    DisableRejected { workflow_id: u64, status: u16 },

    #[error("All retry attempts failed: {0}")]
    RetriesExhausted(#[source] Box<GitHubError>),
}

/// Errors from scanning deployment branches for release commits.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to scan branch '{branch}': {source}")]
    Branch {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Scan worker panicked while scanning {0:?}")]
    WorkerPanicked(Vec<String>),
}

/// Errors from building the commit graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Failed to read deployments of branch '{branch}': {source}")]
    Branch {
        branch: String,
        #[source]
        source: GitError,
    },
}

/// Errors from rollback point resolution and revert plan computation.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Target commit {0} is not part of the fetched trunk history")]
    TargetNotFound(String),

    #[error(
        "Could not resolve a rollback point for {} starting at {target}: trunk history ends after {last}",
        branches.join(", ")
    )]
    Unresolved {
        target: String,
        last: String,
        branches: Vec<String>,
    },

    #[error("Failed to read history of '{branch}': {source}")]
    BranchHistory {
        branch: String,
        #[source]
        source: GitError,
    },
}

/// Errors from the process execution boundary.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// Errors from applying a revert plan to a branch.
#[derive(Error, Debug)]
pub enum RevertError {
    #[error("Revert conflict on '{branch}' at commit {commit}: {detail}")]
    Conflict {
        branch: String,
        commit: String,
        detail: String,
    },

    #[error(
        "git {operation} on '{branch}' timed out after {secs}s (commits: {})",
        commits.join(", ")
    )]
    Timeout {
        branch: String,
        operation: String,
        secs: u64,
        commits: Vec<String>,
    },

    #[error(
        "git {operation} on '{branch}' failed (commits: {}): {output}",
        commits.join(", ")
    )]
    CommandFailed {
        branch: String,
        operation: String,
        commits: Vec<String>,
        output: String,
    },

    #[error("Could not run git on '{branch}': {source}")]
    Process {
        branch: String,
        #[source]
        source: ProcessError,
    },

    #[error("Could not prepare working copy of '{branch}': {source}")]
    WorkingCopy {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Commit {commit} on '{branch}' has no parent to revert against")]
    MissingParent { branch: String, commit: String },

    #[error("Git error on '{branch}' while reverting {commit}: {source}")]
    Git {
        branch: String,
        commit: String,
        #[source]
        source: git2::Error,
    },

    #[error("I/O error on '{branch}' restoring {path}: {source}")]
    Io {
        branch: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to push '{branch}': {reason}")]
    Push { branch: String, reason: String },

    #[error("Revert task for '{branch}' did not finish: {reason}")]
    Task { branch: String, reason: String },
}

impl RevertError {
    /// The deployment branch this failure belongs to.
    pub fn branch(&self) -> &str {
        match self {
            RevertError::Conflict { branch, .. }
            | RevertError::Timeout { branch, .. }
            | RevertError::CommandFailed { branch, .. }
            | RevertError::Process { branch, .. }
            | RevertError::WorkingCopy { branch, .. }
            | RevertError::MissingParent { branch, .. }
            | RevertError::Git { branch, .. }
            | RevertError::Io { branch, .. }
            | RevertError::Push { branch, .. }
            | RevertError::Task { branch, .. } => branch,
        }
    }
}

/// Errors from the end-to-end rollback pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("No deployment branches matched prefix '{0}'")]
    NoBranches(String),

    #[error("Rollback cancelled by user")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Revert failed on {} branch(es): {}", failed.len(), failed.join(", "))]
    BranchesFailed { failed: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_conflict_messages_are_distinct() {
        let timeout = RevertError::Timeout {
            branch: "gitops/a".into(),
            operation: "revert".into(),
            secs: 600,
            commits: vec!["d5".into(), "d4".into()],
        };
        let conflict = RevertError::Conflict {
            branch: "gitops/a".into(),
            commit: "d5".into(),
            detail: "could not revert d5".into(),
        };

        let timeout_msg = timeout.to_string();
        let conflict_msg = conflict.to_string();

        assert!(timeout_msg.contains("timed out after 600s"));
        assert!(timeout_msg.contains("d5, d4"));
        assert!(conflict_msg.contains("conflict"));
        assert!(conflict_msg.contains("d5"));
        assert!(!conflict_msg.contains("timed out"));
    }

    #[test]
    fn test_unresolved_lists_every_branch() {
        let err = ResolveError::Unresolved {
            target: "t3".into(),
            last: "t1".into(),
            branches: vec!["gitops/a".into(), "gitops/b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("gitops/a, gitops/b"));
        assert!(msg.contains("t3"));
    }

    #[test]
    fn test_revert_error_branch_accessor() {
        let err = RevertError::Push {
            branch: "gitops/b".into(),
            reason: "rejected".into(),
        };
        assert_eq!(err.branch(), "gitops/b");
    }
}
