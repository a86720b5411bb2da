//! Concurrent scan of deployment branches for release commits.
//!
//! Branch logs are read through blocking git calls, so every branch scan runs
//! on tokio's blocking pool with a semaphore bounding how many run at once.
//! The first failure stops queued branches from starting and is reported once
//! every started scan has finished; partial results are discarded.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info};

use crate::config::ServiceSelector;
use crate::error::{GitError, ScanError};
use crate::git::{CommitSource, LogQuery};

/// The `<tier>/<service>@` literal that identifies a service's release commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMarker(String);

impl ReleaseMarker {
    pub fn new(tier: &str, service: &str) -> Self {
        Self(format!("{tier}/{service}@"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, message: &str) -> bool {
        message.contains(&self.0)
    }
}

impl From<&ServiceSelector> for ReleaseMarker {
    fn from(selector: &ServiceSelector) -> Self {
        Self::new(&selector.tier, &selector.service)
    }
}

impl fmt::Display for ReleaseMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A release commit found on a deployment branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCommit {
    pub sha: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// The commit deploys the target or a known later trunk commit.
    pub is_target: bool,
}

/// What to look for and where.
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    pub branches: &'a [String],
    pub since: DateTime<Utc>,
    pub marker: &'a ReleaseMarker,
    pub target: &'a str,
    /// Trunk commits newer than the target.
    pub known_later: &'a [String],
    pub workers: usize,
}

/// Whether `message` mentions the target or any known later commit.
pub fn is_target(message: &str, target: &str, known_later: &[String]) -> bool {
    (!target.is_empty() && message.contains(target))
        || known_later
            .iter()
            .any(|sha| !sha.is_empty() && message.contains(sha.as_str()))
}

/// Owned copy of the match criteria, shared by every scan task.
struct Criteria {
    since: DateTime<Utc>,
    marker: ReleaseMarker,
    target: String,
    known_later: Vec<String>,
}

/// Scan every branch in `request` and return its release commits, newest first.
///
/// Each branch is read on the blocking pool; a semaphore bounds how many run
/// at once. The first failure closes the semaphore so queued branches are
/// never started, and is returned once every started scan has finished.
pub async fn scan_branches<S>(
    source: Arc<S>,
    request: &ScanRequest<'_>,
) -> Result<BTreeMap<String, Vec<ScannedCommit>>, ScanError>
where
    S: CommitSource + 'static,
{
    if request.branches.is_empty() {
        return Ok(BTreeMap::new());
    }

    let workers = request.workers.clamp(1, request.branches.len());
    debug!(
        "Scanning {} branches with {} workers for {}",
        request.branches.len(),
        workers,
        request.marker
    );

    let limit = Arc::new(Semaphore::new(workers));
    let criteria = Arc::new(Criteria {
        since: request.since,
        marker: request.marker.clone(),
        target: request.target.to_string(),
        known_later: request.known_later.to_vec(),
    });

    let mut tasks = JoinSet::new();
    for branch in request.branches {
        let (limit, criteria, source) = (
            Arc::clone(&limit),
            Arc::clone(&criteria),
            Arc::clone(&source),
        );
        let branch = branch.clone();

        tasks.spawn(async move {
            // Closed after the first failure.
            let Ok(_permit) = Arc::clone(&limit).acquire_owned().await else {
                return None;
            };
            let name = branch.clone();
            let scanned =
                task::spawn_blocking(move || scan_branch(source.as_ref(), &branch, &criteria))
                    .await;
            if !matches!(scanned, Ok(Ok(_))) {
                // Before the permit is released, so no queued branch starts.
                limit.close();
            }
            Some((name, scanned))
        });
    }

    let mut results = BTreeMap::new();
    let mut failure = None;
    let mut panicked = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((branch, Ok(Ok(commits))))) => {
                results.insert(branch, commits);
            }
            Ok(Some((branch, Ok(Err(source))))) => {
                failure.get_or_insert(ScanError::Branch { branch, source });
            }
            Ok(Some((branch, Err(_)))) => panicked.push(branch),
            Ok(None) => {}
            Err(e) => {
                limit.close();
                panicked.push(e.to_string());
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    if !panicked.is_empty() {
        panicked.sort();
        return Err(ScanError::WorkerPanicked(panicked));
    }

    info!(
        "Scanned {} branches, {} with release commits",
        results.len(),
        results.values().filter(|c: &&Vec<ScannedCommit>| !c.is_empty()).count()
    );
    Ok(results)
}

fn scan_branch<S>(
    source: &S,
    branch: &str,
    criteria: &Criteria,
) -> Result<Vec<ScannedCommit>, GitError>
where
    S: CommitSource + ?Sized,
{
    let query = LogQuery {
        since: Some(criteria.since),
        ..LogQuery::default()
    };
    let log = source.branch_log(branch, &query)?;

    Ok(log
        .commits
        .into_iter()
        .filter(|c| criteria.marker.matches(&c.message))
        .map(|c| ScannedCommit {
            is_target: is_target(&c.message, &criteria.target, &criteria.known_later),
            sha: c.sha,
            timestamp: c.timestamp,
            message: c.message,
        })
        .collect())
}

/// Branches whose newest release commit deploys the target or something later.
pub fn affected_branches(scan: &BTreeMap<String, Vec<ScannedCommit>>) -> Vec<String> {
    scan.iter()
        .filter(|(_, commits)| commits.first().is_some_and(|c| c.is_target))
        .map(|(branch, _)| branch.clone())
        .collect()
}
