//! Attach deployment events to trunk commits.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use tracing::{debug, info, warn};

use crate::config::BranchFailurePolicy;
use crate::error::GraphError;
use crate::git::{CommitSource, LogQuery};

use super::commit::{CommitGraph, DeploymentEvent, TrunkCommit};

/// `<tier>/<service>@<40 hex>` anywhere in a deployment commit message.
static REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w-]+/[\w-]+@([0-9a-f]{40})").expect("Invalid regex"));

/// The trunk commit identity referenced by a deployment commit message.
///
/// Only the first reference counts.
pub fn extract_reference(message: &str) -> Option<&str> {
    REFERENCE_PATTERN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Which deployment branches to read and how.
#[derive(Debug, Clone)]
pub struct GraphRequest<'a> {
    pub branches: &'a [String],
    pub since: DateTime<Utc>,
    pub path: Option<&'a str>,
    pub policy: BranchFailurePolicy,
}

/// Build the trunk graph and attach deployments found on `request.branches`.
///
/// A reference to a commit outside `seeds` is ignored. When a branch cannot
/// be read, [`BranchFailurePolicy`] decides between skipping it and failing.
pub fn build_graph<S>(
    source: &S,
    seeds: impl IntoIterator<Item = TrunkCommit>,
    request: &GraphRequest<'_>,
) -> Result<CommitGraph, GraphError>
where
    S: CommitSource + ?Sized,
{
    let mut graph = CommitGraph::from_seeds(seeds);
    let query = LogQuery {
        since: Some(request.since),
        path: request.path.map(str::to_string),
        max_count: None,
    };

    for branch in request.branches {
        let log = match source.branch_log(branch, &query) {
            Ok(log) => log,
            Err(source) => match request.policy {
                BranchFailurePolicy::Skip => {
                    warn!("Skipping {} while building the graph: {}", branch, source);
                    continue;
                }
                BranchFailurePolicy::FailFast => {
                    return Err(GraphError::Branch {
                        branch: branch.clone(),
                        source,
                    });
                }
            },
        };

        let mut attached = 0usize;
        for commit in &log.commits {
            let Some(trunk_sha) = extract_reference(&commit.message) else {
                continue;
            };
            debug!("{} {} references {}", branch, commit.sha, trunk_sha);

            let event = DeploymentEvent {
                sha: commit.sha.clone(),
                timestamp: commit.timestamp,
            };
            if graph.record(trunk_sha, branch, event) {
                attached += 1;
            }
        }

        debug!("Attached {} deployments from {}", attached, branch);
    }

    info!(
        "Built graph of {} trunk commits from {} branches",
        graph.len(),
        request.branches.len()
    );
    Ok(graph)
}
