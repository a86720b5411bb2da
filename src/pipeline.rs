//! Rollback pipeline: find, plan and apply reverts across deployment branches.
//!
//! Stages: list deployment branches, fetch trunk history, build the graph,
//! optionally narrow to branches running the affected service, resolve
//! rollback points, compute plans, then confirm and execute.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dialoguer::Confirm;
use tempfile::TempDir;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::{self, RollbackConfig};
use crate::error::PipelineError;
use crate::git::{CommitSource, LocalRepository, clone_repository, github_url};
use crate::github::{GitHubClient, get_github_token};
use crate::graph::{CommitGraph, GraphRequest, TrunkCommit, build_graph};
use crate::revert::{BranchOutcome, RevertOptions, execute_plans, select_backend};
use crate::rollback::{
    PlanStatus, PlanWindow, RevertPlan, RollbackPoint, compute_revert_plans,
    resolve_rollback_points,
};
use crate::scan::{ReleaseMarker, ScanRequest, affected_branches, scan_branches};

/// Everything computed before any branch is changed.
#[derive(Debug)]
pub struct RollbackPlanning {
    pub graph: CommitGraph,
    /// Branches considered for rollback, after the service prefilter.
    pub branches: Vec<String>,
    pub points: BTreeMap<String, RollbackPoint>,
    pub plans: BTreeMap<String, RevertPlan>,
}

/// Build the graph, resolve rollback points and compute revert plans.
///
/// `seeds` is the trunk history; `branches` are the deployment branches
/// readable through `source`. Repository reads run on the blocking pool.
pub async fn plan_rollback<S>(
    source: Arc<S>,
    seeds: Vec<TrunkCommit>,
    branches: &[String],
    config: &RollbackConfig,
) -> Result<RollbackPlanning, PipelineError>
where
    S: CommitSource + 'static,
{
    let since = config.since();

    let graph = {
        let source = Arc::clone(&source);
        let branches = branches.to_vec();
        let path = config.path.clone();
        let policy = config.graph_policy;
        blocking(move || {
            let request = GraphRequest {
                branches: &branches,
                since,
                path: path.as_deref(),
                policy,
            };
            Ok(build_graph(source.as_ref(), seeds, &request)?)
        })
        .await?
    };

    let branches = match &config.selector {
        Some(selector) => {
            let marker = ReleaseMarker::from(selector);
            let known_later = graph.later_than(&config.target);
            debug!(
                "{} trunk commits are newer than {}",
                known_later.len(),
                config.target
            );
            let scan = scan_branches(
                Arc::clone(&source),
                &ScanRequest {
                    branches,
                    since,
                    marker: &marker,
                    target: &config.target,
                    known_later: &known_later,
                    workers: config::scan_workers(),
                },
            )
            .await?;
            let affected = affected_branches(&scan);
            info!(
                "{} of {} branches run {} at or after the target",
                affected.len(),
                branches.len(),
                marker
            );
            affected
        }
        None => branches.to_vec(),
    };

    let target = config.target.clone();
    let window = PlanWindow {
        since: Some(since),
        max_count: config.max_count(),
    };
    blocking(move || {
        let points = resolve_rollback_points(&graph, &branches, &target)?;
        let plans = compute_revert_plans(source.as_ref(), &points, window)?;
        Ok(RollbackPlanning {
            graph,
            branches,
            points,
            plans,
        })
    })
    .await
}

/// Run blocking repository work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work).await?
}

/// Run the full rollback pipeline.
pub async fn run_rollback(config: RollbackConfig) -> Result<(), PipelineError> {
    let token = get_github_token()?;
    let client = GitHubClient::new(&token, &config.owner, &config.repo)?;

    // ── Stage 1: Deployment branches ──
    let branches = client
        .deployment_branches(&config.branch_prefix, &config.ignore)
        .await?;
    if branches.is_empty() {
        return Err(PipelineError::NoBranches(config.branch_prefix.clone()));
    }
    println!(
        "Found {} deployment branches under {}",
        branches.len(),
        config.branch_prefix
    );

    // ── Stage 2: Local repository ──
    let (local, _clone_dir) = {
        let (config, token) = (config.clone(), token.clone());
        blocking(move || open_or_clone(&config, &token)).await?
    };
    let local = Arc::new(local);

    // ── Stage 3: Trunk history ──
    let trunk = client
        .list_commits_since(&config.trunk, config.since())
        .await?;
    println!("Fetched {} commits from {}", trunk.len(), config.trunk);
    let seeds: Vec<TrunkCommit> = trunk.iter().map(TrunkCommit::from_remote).collect();

    // ── Stage 4: Plan ──
    let planning = plan_rollback(Arc::clone(&local), seeds, &branches, &config).await?;
    print_plans(&planning);

    if !config.rollback {
        println!();
        println!("Dry run complete. No branches changed.");
        return Ok(());
    }

    let pending: Vec<&String> = planning
        .plans
        .iter()
        .filter(|(_, plan)| !plan.is_empty())
        .map(|(branch, _)| branch)
        .collect();
    if pending.is_empty() {
        println!();
        println!("Nothing to revert.");
        return Ok(());
    }

    // ── Stage 5: Confirmation prompt ──
    if !config.assume_yes {
        println!();
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Revert {} branch(es){}?",
                pending.len(),
                if config.push { " and push" } else { "" }
            ))
            .default(false)
            .interact()
            .map_err(|_| PipelineError::Cancelled)?;

        if !confirmed {
            return Err(PipelineError::Cancelled);
        }
    }

    // ── Stage 6: Stop in-flight deployments ──
    if config.cancel_runs {
        for branch in &pending {
            cancel_active_runs(&client, branch).await;
        }
    }

    // ── Stage 7: Execute ──
    let backend = select_backend(config.backend, local.path(), Some(token));
    let options = RevertOptions {
        force: config.force,
        push: config.push,
        author: config.author.clone(),
    };
    let outcomes = execute_plans(backend.as_ref(), &planning.plans, &options).await;

    println!();
    let failed = print_outcomes(&outcomes);
    if !failed.is_empty() {
        return Err(PipelineError::BranchesFailed { failed });
    }

    println!();
    println!("Rolled back to {}", config.target);
    Ok(())
}

/// Use `--repo-path` when given, otherwise clone into a temporary directory.
///
/// The returned directory guard must outlive every use of the repository.
fn open_or_clone(
    config: &RollbackConfig,
    token: &str,
) -> Result<(LocalRepository, Option<TempDir>), PipelineError> {
    if let Some(path) = &config.repo_path {
        println!("Using repository at {}", path.display());
        return Ok((LocalRepository::open(path.clone())?, None));
    }

    let dir = tempfile::Builder::new()
        .prefix("rewind-clone-")
        .tempdir()
        .map_err(crate::error::GitError::Io)?;
    let dest: PathBuf = dir.path().join(&config.repo);
    let url = github_url(&config.owner, &config.repo);
    clone_repository(&url, &dest, config.depth, Some(token))?;
    println!("Cloned {}/{}", config.owner, config.repo);

    Ok((LocalRepository::open(dest)?, Some(dir)))
}

async fn cancel_active_runs(client: &GitHubClient, branch: &str) {
    let runs = match client.list_active_workflow_runs(branch).await {
        Ok(runs) => runs,
        Err(e) => {
            warn!("Could not list workflow runs on {}: {}", branch, e);
            return;
        }
    };

    for run in runs {
        match client.force_cancel_workflow_run(run.id).await {
            Ok(()) => println!(
                "  [DONE] Cancelled run {} ({}) on {}",
                run.id,
                run.name.as_deref().unwrap_or("unnamed"),
                branch
            ),
            Err(e) => eprintln!("  [WARN] Could not cancel run {} on {}: {}", run.id, branch, e),
        }
    }
}

fn print_plans(planning: &RollbackPlanning) {
    println!();
    println!("Rollback plan:");
    for (branch, plan) in &planning.plans {
        let point = &planning.points[branch];
        println!(
            "  {} -> {} (trunk {})",
            branch,
            short(&point.deployment.sha),
            short(&point.trunk_sha)
        );
        match plan.status {
            PlanStatus::Complete if plan.is_empty() => println!("    already at rollback point"),
            PlanStatus::Complete => {}
            PlanStatus::WindowExhausted => {
                println!("    [WARN] time window ended first, plan may be incomplete")
            }
            PlanStatus::RollbackCommitNotFound => {
                println!("    [WARN] rollback commit not in fetched history, nothing planned")
            }
        }
        for sha in &plan.commits {
            println!("    revert {}", short(sha));
        }
    }
}

/// Print one line per branch and return the failed branch names.
fn print_outcomes(outcomes: &BTreeMap<String, BranchOutcome>) -> Vec<String> {
    let mut failed = Vec::new();
    for (branch, outcome) in outcomes {
        match outcome {
            BranchOutcome::Reverted(report) => {
                println!(
                    "  [DONE] {}: reverted {} commit(s){}",
                    branch,
                    report.reverted.len(),
                    if report.pushed { ", pushed" } else { "" }
                );
                for sha in &report.skipped_merges {
                    println!("  [WARN] {}: skipped merge commit {}", branch, short(sha));
                }
            }
            BranchOutcome::NoOp => println!("  [SKIP] {}: nothing to revert", branch),
            BranchOutcome::Failed(e) => {
                eprintln!("  [FAIL] {}", e);
                failed.push(branch.clone());
            }
        }
    }
    failed
}

fn short(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RevertError;
    use crate::revert::RevertReport;

    #[test]
    fn test_short_sha() {
        assert_eq!(short("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn test_print_outcomes_collects_failures() {
        let outcomes = BTreeMap::from([
            (
                "gitops/a".to_string(),
                BranchOutcome::Reverted(RevertReport {
                    branch: "gitops/a".into(),
                    reverted: vec!["d5".into()],
                    skipped_merges: vec!["m1".into()],
                    pushed: true,
                    backend: "cli",
                }),
            ),
            ("gitops/b".to_string(), BranchOutcome::NoOp),
            (
                "gitops/c".to_string(),
                BranchOutcome::Failed(RevertError::Push {
                    branch: "gitops/c".into(),
                    reason: "rejected".into(),
                }),
            ),
        ]);

        assert_eq!(print_outcomes(&outcomes), vec!["gitops/c".to_string()]);
    }
}
