//! Applying revert plans to deployment branches.
//!
//! Two backends implement [`RevertBackend`]: one drives the `git` CLI in an
//! isolated worktree, the other reverses tree diffs through libgit2 when no
//! `git` executable is available.

mod cli;
mod in_process;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::RevertError;
use crate::rollback::RevertPlan;

pub use cli::CliBackend;
pub use in_process::{InProcessBackend, revert_message};

/// Identity used for revert commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "rewind".to_string(),
            email: "rewind@users.noreply.github.com".to_string(),
        }
    }
}

/// Which revert backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// `git` CLI when it is on PATH, in-process otherwise.
    #[default]
    Auto,
    Cli,
    InProcess,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::Cli => "cli",
            BackendKind::InProcess => "in-process",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "cli" | "git" => Ok(BackendKind::Cli),
            "in-process" | "inprocess" | "libgit2" => Ok(BackendKind::InProcess),
            other => Err(format!(
                "unknown backend '{other}' (expected auto, cli or in-process)"
            )),
        }
    }
}

/// One branch's revert work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertRequest {
    pub branch: String,
    /// Commits to revert, newest first.
    pub commits: Vec<String>,
    pub force: bool,
    pub push: bool,
    pub author: Author,
}

/// What a backend did on one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertReport {
    pub branch: String,
    pub reverted: Vec<String>,
    /// Merge commits left alone by the in-process backend.
    pub skipped_merges: Vec<String>,
    pub pushed: bool,
    pub backend: &'static str,
}

/// Final state of one branch after execution.
#[derive(Debug)]
pub enum BranchOutcome {
    Reverted(RevertReport),
    /// The plan was empty.
    NoOp,
    Failed(RevertError),
}

impl BranchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, BranchOutcome::Failed(_))
    }
}

/// Options shared by every branch of one execution.
#[derive(Debug, Clone, Default)]
pub struct RevertOptions {
    pub force: bool,
    pub push: bool,
    pub author: Author,
}

/// Applies a list of reverts to one branch.
///
/// This abstraction allows mocking the git backends in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RevertBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Revert `request.commits` in order, newest first.
    async fn apply(&self, request: &RevertRequest) -> Result<RevertReport, RevertError>;
}

/// Pick a backend for the repository at `repo_path`.
pub fn select_backend(
    kind: BackendKind,
    repo_path: &Path,
    token: Option<String>,
) -> Box<dyn RevertBackend> {
    let use_cli = match kind {
        BackendKind::Cli => true,
        BackendKind::InProcess => false,
        BackendKind::Auto => {
            let found = which::which("git").is_ok();
            if !found {
                warn!("git executable not found, using the in-process revert backend");
            }
            found
        }
    };

    if use_cli {
        Box::new(CliBackend::new(repo_path, token))
    } else {
        Box::new(InProcessBackend::new(repo_path, token))
    }
}

/// Execute every plan and report each branch's outcome.
///
/// Branches are processed one after another; a failure on one branch does not
/// stop the others, and nothing is rolled back on branches that succeeded.
pub async fn execute_plans(
    backend: &dyn RevertBackend,
    plans: &BTreeMap<String, RevertPlan>,
    options: &RevertOptions,
) -> BTreeMap<String, BranchOutcome> {
    let mut outcomes = BTreeMap::new();

    for (branch, plan) in plans {
        if plan.is_empty() {
            info!("{}: nothing to revert", branch);
            outcomes.insert(branch.clone(), BranchOutcome::NoOp);
            continue;
        }

        let request = RevertRequest {
            branch: branch.clone(),
            commits: plan.commits.clone(),
            force: options.force,
            push: options.push,
            author: options.author.clone(),
        };

        info!(
            "{}: reverting {} commits with the {} backend",
            branch,
            request.commits.len(),
            backend.name()
        );
        let outcome = match backend.apply(&request).await {
            Ok(report) => BranchOutcome::Reverted(report),
            Err(e) => {
                warn!("{}: {}", branch, e);
                BranchOutcome::Failed(e)
            }
        };
        outcomes.insert(branch.clone(), outcome);
    }

    outcomes
}
