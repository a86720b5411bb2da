//! Revert backend driving the `git` executable.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use git2::{Oid, Repository};
use regex_lite::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{GitError, ProcessError, RevertError};
use crate::git::{
    WorkingCopy, branch_tip, ci_git_env, ensure_local_branch, restore_branch, worktree_lock,
};
use crate::process::{CommandOutput, run_command};

use super::{Author, RevertBackend, RevertReport, RevertRequest};

/// Grace period for removing a worktree after the main deadline.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

static FAILED_REVERT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"could not revert ([0-9a-f]{7,40})").expect("Invalid regex"));

/// Runs `git worktree add`, `git revert`, `git add` and `git push`.
///
/// Every subprocess of one branch shares a single deadline.
#[derive(Debug, Clone)]
pub struct CliBackend {
    repo_path: PathBuf,
    token: Option<String>,
    timeout: Duration,
}

impl CliBackend {
    pub fn new(repo_path: &Path, token: Option<String>) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            token,
            timeout: config::revert_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn env(&self, author: &Author) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = [
            ("GIT_TERMINAL_PROMPT", "0"),
            ("GIT_MERGE_AUTOEDIT", "no"),
            ("GIT_EDITOR", "true"),
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        env.extend(ci_git_env(self.token.as_deref()));
        env
    }

    fn open(&self, branch: &str) -> Result<Repository, RevertError> {
        Repository::open(&self.repo_path).map_err(|source| RevertError::WorkingCopy {
            branch: branch.to_string(),
            source: GitError::OpenRepository {
                path: self.repo_path.display().to_string(),
                source,
            },
        })
    }

    /// Reserve a path and check the branch out there, under the repository lock.
    async fn create_working_copy(
        &self,
        context: &RequestContext<'_>,
    ) -> Result<(WorkingCopy, Oid), RevertError> {
        let lock = worktree_lock(&self.repo_path);
        let _guard = lock.lock().await;

        let (copy, tip) = {
            let repo = self.open(context.branch)?;
            let working_copy_err = |source| RevertError::WorkingCopy {
                branch: context.branch.to_string(),
                source,
            };
            ensure_local_branch(&repo, context.branch).map_err(working_copy_err)?;
            let tip = branch_tip(&repo, context.branch).map_err(working_copy_err)?;
            let copy = WorkingCopy::reserve(context.branch).map_err(working_copy_err)?;
            (copy, tip)
        };

        let args = vec![
            "worktree".to_string(),
            "add".to_string(),
            copy.path.display().to_string(),
            context.branch.to_string(),
        ];
        context.git("worktree add", &args, &self.repo_path).await?;
        debug!("Created worktree {} for {}", copy.path.display(), context.branch);

        Ok((copy, tip))
    }

    async fn revert_in(
        &self,
        copy: &WorkingCopy,
        request: &RevertRequest,
        context: &RequestContext<'_>,
    ) -> Result<RevertReport, RevertError> {
        let mut args = vec!["revert".to_string(), "--no-edit".to_string()];
        if request.force {
            args.push("--no-gpg-sign".to_string());
        }
        args.extend(request.commits.iter().cloned());

        let output = context.run(&args, &copy.path).await?;
        if !output.success {
            return Err(classify_revert_failure(request, output));
        }

        let add = vec!["add".to_string(), ".".to_string()];
        context.git("add", &add, &copy.path).await?;

        if !request.push {
            info!("{}: reverted locally, push disabled", request.branch);
            return Ok(report(request, false));
        }

        let push = vec![
            "push".to_string(),
            "origin".to_string(),
            request.branch.clone(),
        ];
        context.git("push", &push, &copy.path).await?;
        info!("{}: pushed {} reverts", request.branch, request.commits.len());

        Ok(report(request, true))
    }

    async fn remove_working_copy(&self, copy: &WorkingCopy, context: &RequestContext<'_>) {
        let args = vec![
            "worktree".to_string(),
            "remove".to_string(),
            "--force".to_string(),
            copy.path.display().to_string(),
        ];
        let deadline = Instant::now() + CLEANUP_TIMEOUT;
        match run_command("git", &args, &self.repo_path, &context.env, deadline).await {
            Ok(out) if out.success => {}
            Ok(out) => warn!(
                "Failed to remove worktree {}: {}",
                copy.path.display(),
                out.output.trim()
            ),
            Err(e) => warn!("Failed to remove worktree {}: {}", copy.path.display(), e),
        }
    }

    fn restore(&self, branch: &str, tip: Oid) {
        let restored = self
            .open(branch)
            .and_then(|repo| {
                restore_branch(&repo, branch, tip).map_err(|source| RevertError::WorkingCopy {
                    branch: branch.to_string(),
                    source,
                })
            });
        if let Err(e) = restored {
            warn!("{}: could not reset local branch to {}: {}", branch, tip, e);
        }
    }
}

#[async_trait]
impl RevertBackend for CliBackend {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn apply(&self, request: &RevertRequest) -> Result<RevertReport, RevertError> {
        if request.commits.is_empty() {
            return Ok(report(request, false));
        }

        let context = RequestContext {
            branch: &request.branch,
            commits: &request.commits,
            env: self.env(&request.author),
            deadline: Instant::now() + self.timeout,
            secs: self.timeout.as_secs(),
        };

        let (copy, tip) = self.create_working_copy(&context).await?;
        let result = self.revert_in(&copy, request, &context).await;
        self.remove_working_copy(&copy, &context).await;

        if result.is_err() {
            self.restore(&request.branch, tip);
        }
        result
    }
}

/// Per-branch state shared by every git invocation.
struct RequestContext<'a> {
    branch: &'a str,
    commits: &'a [String],
    env: Vec<(String, String)>,
    deadline: Instant,
    secs: u64,
}

impl RequestContext<'_> {
    /// Run git, mapping spawn failures and the deadline to typed errors.
    async fn run(&self, args: &[String], dir: &Path) -> Result<CommandOutput, RevertError> {
        let operation = args.first().map(String::as_str).unwrap_or("git");
        run_command("git", args, dir, &self.env, self.deadline)
            .await
            .map_err(|e| match e {
                ProcessError::Timeout { .. } => RevertError::Timeout {
                    branch: self.branch.to_string(),
                    operation: operation.to_string(),
                    secs: self.secs,
                    commits: self.commits.to_vec(),
                },
                source => RevertError::Process {
                    branch: self.branch.to_string(),
                    source,
                },
            })
    }

    /// Run git and fail on a non-zero exit.
    async fn git(
        &self,
        operation: &str,
        args: &[String],
        dir: &Path,
    ) -> Result<CommandOutput, RevertError> {
        let output = self.run(args, dir).await?;
        if output.success {
            return Ok(output);
        }
        Err(RevertError::CommandFailed {
            branch: self.branch.to_string(),
            operation: operation.to_string(),
            commits: self.commits.to_vec(),
            output: output.output.trim().to_string(),
        })
    }
}

fn report(request: &RevertRequest, pushed: bool) -> RevertReport {
    RevertReport {
        branch: request.branch.clone(),
        reverted: request.commits.clone(),
        skipped_merges: Vec::new(),
        pushed,
        backend: "cli",
    }
}

/// Tell a conflicting revert apart from any other `git revert` failure.
fn classify_revert_failure(request: &RevertRequest, output: CommandOutput) -> RevertError {
    let text = output.output.trim().to_string();
    let failing = FAILED_REVERT_PATTERN
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    if failing.is_none() && !text.contains("CONFLICT") {
        return RevertError::CommandFailed {
            branch: request.branch.clone(),
            operation: "revert".to_string(),
            commits: request.commits.clone(),
            output: text,
        };
    }

    let commit = failing
        .and_then(|short| {
            request
                .commits
                .iter()
                .find(|sha| sha.starts_with(&short))
                .cloned()
        })
        .or_else(|| request.commits.first().cloned())
        .unwrap_or_default();

    RevertError::Conflict {
        branch: request.branch.clone(),
        commit,
        detail: text,
    }
}
