//! Walk trunk history backward to find each branch's rollback point.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info};

use crate::error::ResolveError;
use crate::graph::{CommitGraph, DeploymentEvent};

/// Where a branch should be rolled back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPoint {
    /// The branch commit to restore.
    pub deployment: DeploymentEvent,
    /// The trunk commit that deployment deployed.
    pub trunk_sha: String,
}

/// Find, for every branch, the newest deployment at or before `target`.
///
/// The walk starts at `target` and follows first parents. Each commit is
/// visited at most once, so a cyclic or truncated graph ends the walk with
/// [`ResolveError::Unresolved`] instead of looping.
pub fn resolve_rollback_points(
    graph: &CommitGraph,
    branches: &[String],
    target: &str,
) -> Result<BTreeMap<String, RollbackPoint>, ResolveError> {
    let start = graph
        .get(target)
        .ok_or_else(|| ResolveError::TargetNotFound(target.to_string()))?;

    let mut unresolved: BTreeSet<&str> = branches.iter().map(String::as_str).collect();
    let mut points = BTreeMap::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = Some(start);
    let mut last = target;

    while !unresolved.is_empty() {
        let Some(commit) = current.filter(|c| visited.insert(c.sha.as_str())) else {
            return Err(ResolveError::Unresolved {
                target: target.to_string(),
                last: last.to_string(),
                branches: unresolved.into_iter().map(str::to_string).collect(),
            });
        };

        for (branch, event) in &commit.deployments {
            if unresolved.remove(branch.as_str()) {
                debug!(
                    "{} rolls back to {} (trunk {})",
                    branch, event.sha, commit.sha
                );
                points.insert(
                    branch.clone(),
                    RollbackPoint {
                        deployment: event.clone(),
                        trunk_sha: commit.sha.clone(),
                    },
                );
            }
        }

        last = &commit.sha;
        current = commit.parent.as_deref().and_then(|p| graph.get(p));
    }

    info!("Resolved rollback points for {} branches", points.len());
    Ok(points)
}
