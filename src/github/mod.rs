//! GitHub API operations using octocrab.

pub mod auth;
pub mod client;
pub mod retry;
pub mod workflows;

pub use auth::get_github_token;
pub use client::{GitHubClient, RemoteCommit, is_deployment_branch, parse_github_remote};
pub use workflows::{ACTIVE_STATUSES, WorkflowRun};
