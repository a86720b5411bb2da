//! Repository transport using git2-rs.

pub mod clone;
pub mod credentials;
pub mod history;
pub mod worktree;

pub use clone::clone_repository;
pub use credentials::{ci_git_env, github_url, remote_callbacks};
pub use history::{BranchCommit, BranchLog, CommitSource, LocalRepository, LogBoundary, LogQuery};
pub use worktree::{
    WorkingCopy, branch_tip, ensure_local_branch, restore_branch, worktree_lock,
};

#[cfg(test)]
pub use history::MockCommitSource;
