//! Trunk commits and the deployments recorded against them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::github::RemoteCommit;

/// A deployment-branch commit that deployed a trunk commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentEvent {
    pub sha: String,
    pub timestamp: DateTime<Utc>,
}

/// A trunk commit and, per deployment branch, the commit that deployed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrunkCommit {
    pub sha: String,
    /// First parent; `None` for a root commit.
    pub parent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub deployments: BTreeMap<String, DeploymentEvent>,
}

impl TrunkCommit {
    /// A trunk commit with no deployments recorded yet.
    pub fn seed(sha: &str, parent: Option<&str>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sha: sha.to_string(),
            parent: parent.map(str::to_string),
            timestamp,
            deployments: BTreeMap::new(),
        }
    }

    /// Seed from the host API, keeping only the first parent.
    pub fn from_remote(commit: &RemoteCommit) -> Self {
        Self::seed(
            &commit.sha,
            commit.parents.first().map(String::as_str),
            commit.timestamp,
        )
    }
}

/// Trunk history keyed by commit identity.
#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    commits: HashMap<String, TrunkCommit>,
}

impl CommitGraph {
    pub fn from_seeds(seeds: impl IntoIterator<Item = TrunkCommit>) -> Self {
        Self {
            commits: seeds.into_iter().map(|c| (c.sha.clone(), c)).collect(),
        }
    }

    pub fn get(&self, sha: &str) -> Option<&TrunkCommit> {
        self.commits.get(sha)
    }

    pub fn contains(&self, sha: &str) -> bool {
        self.commits.contains_key(sha)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// All commits, newest first.
    pub fn newest_first(&self) -> Vec<&TrunkCommit> {
        let mut commits: Vec<&TrunkCommit> = self.commits.values().collect();
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.sha.cmp(&b.sha)));
        commits
    }

    /// Attach a deployment to `trunk_sha` unless the branch already has one there.
    ///
    /// Returns false when `trunk_sha` is not part of the graph.
    pub(crate) fn record(&mut self, trunk_sha: &str, branch: &str, event: DeploymentEvent) -> bool {
        match self.commits.get_mut(trunk_sha) {
            Some(commit) => {
                commit
                    .deployments
                    .entry(branch.to_string())
                    .or_insert(event);
                true
            }
            None => false,
        }
    }

    /// Identities of the commits whose first-parent chain reaches `target`,
    /// newest first. `target` itself is not included.
    pub fn later_than(&self, target: &str) -> Vec<String> {
        let mut memo: HashMap<&str, bool> = HashMap::new();

        for start in self.commits.keys() {
            let mut path: Vec<&str> = Vec::new();
            let mut current = Some(start.as_str());

            let reaches_target = loop {
                let Some(sha) = current else { break false };
                if sha == target {
                    break true;
                }
                if let Some(&known) = memo.get(sha) {
                    break known;
                }
                let Some(commit) = self.commits.get(sha) else {
                    break false;
                };
                if path.contains(&sha) {
                    break false;
                }
                path.push(sha);
                current = commit.parent.as_deref();
            };

            for sha in path {
                memo.insert(sha, reaches_target);
            }
        }

        self.newest_first()
            .into_iter()
            .filter(|c| memo.get(c.sha.as_str()).copied().unwrap_or(false))
            .map(|c| c.sha.clone())
            .collect()
    }
}
