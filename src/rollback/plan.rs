//! Revert plans: branch commits made after the rollback point.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use tracing::{info, warn};

use crate::error::ResolveError;
use crate::git::{CommitSource, LogBoundary, LogQuery};

use super::resolver::RollbackPoint;

static REVERTS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"This reverts commit ([0-9a-f]{40})").expect("Invalid regex"));

/// How the plan computation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// The rollback commit was found.
    Complete,
    /// The time bound was reached first; the plan holds what was seen.
    WindowExhausted,
    /// History ended without the rollback commit; the plan is empty.
    RollbackCommitNotFound,
}

/// Commits to revert on one branch, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertPlan {
    pub branch: String,
    /// The branch commit the plan rolls back to.
    pub rollback_to: String,
    pub commits: Vec<String>,
    pub status: PlanStatus,
}

impl RevertPlan {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Bounds on how far back a plan looks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanWindow {
    pub since: Option<DateTime<Utc>>,
    pub max_count: Option<usize>,
}

/// List the commits on `branch` strictly after the rollback point.
///
/// Commits already undone by a later revert on the branch cancel out with
/// that revert, so a fully reverted branch yields an empty plan.
pub fn compute_revert_plan<S>(
    source: &S,
    branch: &str,
    point: &RollbackPoint,
    window: PlanWindow,
) -> Result<RevertPlan, ResolveError>
where
    S: CommitSource + ?Sized,
{
    let query = LogQuery {
        since: window.since,
        path: None,
        max_count: window.max_count,
    };
    let log = source
        .branch_log(branch, &query)
        .map_err(|source| ResolveError::BranchHistory {
            branch: branch.to_string(),
            source,
        })?;

    let target = point.deployment.sha.as_str();
    let mut entries: Vec<Option<String>> = Vec::new();
    // original commit -> index of the revert that undoes it
    let mut pending: HashMap<String, usize> = HashMap::new();
    let mut found = false;

    for commit in log.commits {
        if commit.sha == target {
            found = true;
            break;
        }
        if let Some(index) = pending.remove(&commit.sha) {
            entries[index] = None;
            continue;
        }
        if let Some(reverted) = reverted_commit(&commit.message) {
            pending.insert(reverted.to_string(), entries.len());
        }
        entries.push(Some(commit.sha));
    }

    let mut commits: Vec<String> = entries.into_iter().flatten().collect();

    let status = if found {
        PlanStatus::Complete
    } else {
        match log.stopped_at {
            Some(LogBoundary::Since) => {
                warn!(
                    "{}: time window ended before reaching {}, plan may be partial",
                    branch, target
                );
                PlanStatus::WindowExhausted
            }
            _ => {
                warn!(
                    "{}: rollback commit {} not found in branch history",
                    branch, target
                );
                commits.clear();
                PlanStatus::RollbackCommitNotFound
            }
        }
    };

    Ok(RevertPlan {
        branch: branch.to_string(),
        rollback_to: target.to_string(),
        commits,
        status,
    })
}

/// Compute plans for every resolved branch, stopping at the first failure.
pub fn compute_revert_plans<S>(
    source: &S,
    points: &BTreeMap<String, RollbackPoint>,
    window: PlanWindow,
) -> Result<BTreeMap<String, RevertPlan>, ResolveError>
where
    S: CommitSource + ?Sized,
{
    let mut plans = BTreeMap::new();
    for (branch, point) in points {
        let plan = compute_revert_plan(source, branch, point, window)?;
        info!("{}: {} commits to revert", branch, plan.commits.len());
        plans.insert(branch.clone(), plan);
    }
    Ok(plans)
}

fn reverted_commit(message: &str) -> Option<&str> {
    REVERTS_PATTERN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
