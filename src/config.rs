//! Run configuration, defaults and environment overrides.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use tracing::warn;

use crate::revert::{Author, BackendKind};

/// Default ceiling for revert/push subprocess work (10 minutes).
pub const DEFAULT_REVERT_TIMEOUT_SECS: u64 = 600;

/// Environment variable to override the revert timeout.
pub const REVERT_TIMEOUT_ENV_VAR: &str = "REWIND_REVERT_TIMEOUT";

/// Default number of branch scan workers.
pub const DEFAULT_SCAN_WORKERS: usize = 4;

/// Environment variable to override the number of scan workers.
pub const SCAN_WORKERS_ENV_VAR: &str = "REWIND_SCAN_WORKERS";

/// Prefix shared by every deployment branch.
pub const DEFAULT_BRANCH_PREFIX: &str = "gitops/";

/// Deployment branches that never take part in a rollback.
pub const DEFAULT_IGNORED_BRANCHES: &[&str] = &[
    "gitops/sink",
    "gitops/infra",
    "gitops/stage",
    "gitops/seo-indexation",
    "gitops/member-data",
];

/// Read a positive integer from an environment variable.
///
/// Logs a warning if the variable is set but holds an invalid value
/// (non-numeric, empty, or zero) and returns `default`.
fn env_u64(var: &str, default: u64) -> u64 {
    match env::var(var) {
        Ok(v) if !v.is_empty() => match v.parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!("Invalid {} value '{}', using default {}", var, v, default);
                default
            }
        },
        _ => default,
    }
}

/// Get the configured revert timeout.
///
/// Reads from REWIND_REVERT_TIMEOUT (seconds) if set, otherwise 600 seconds.
pub fn revert_timeout() -> Duration {
    Duration::from_secs(env_u64(REVERT_TIMEOUT_ENV_VAR, DEFAULT_REVERT_TIMEOUT_SECS))
}

/// Get the configured number of scan workers.
pub fn scan_workers() -> usize {
    env_u64(SCAN_WORKERS_ENV_VAR, DEFAULT_SCAN_WORKERS as u64) as usize
}

/// How the graph builder treats a branch whose history cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchFailurePolicy {
    /// Log and leave the branch out of the graph.
    #[default]
    Skip,
    /// Abort graph construction.
    FailFast,
}

/// Logical tier/service pair used to build the release marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSelector {
    pub tier: String,
    pub service: String,
}

/// Configuration for a rollback run, derived from CLI flags.
#[derive(Debug, Clone)]
pub struct RollbackConfig {
    pub target: String,
    pub owner: String,
    pub repo: String,
    pub trunk: String,
    pub path: Option<String>,
    pub branch_prefix: String,
    pub ignore: Vec<String>,
    pub since_months: u32,
    pub depth: u32,
    pub selector: Option<ServiceSelector>,
    pub repo_path: Option<PathBuf>,
    pub rollback: bool,
    pub push: bool,
    pub force: bool,
    pub backend: BackendKind,
    pub cancel_runs: bool,
    pub graph_policy: BranchFailurePolicy,
    pub assume_yes: bool,
    pub author: Author,
}

impl RollbackConfig {
    /// Lower time bound for trunk and branch history.
    pub fn since(&self) -> DateTime<Utc> {
        let now = Utc::now();
        now.checked_sub_months(Months::new(self.since_months))
            .unwrap_or(now)
    }

    /// Maximum number of branch commits to inspect, `None` for unbounded.
    pub fn max_count(&self) -> Option<usize> {
        (self.depth > 0).then_some(self.depth as usize)
    }
}
