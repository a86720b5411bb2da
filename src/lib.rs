//! rewind - roll GitOps deployment branches back to a trunk commit.
//!
//! # Overview
//!
//! Deployment branches carry commits whose messages reference the trunk
//! commit they deploy (`<tier>/<service>@<sha>`). rewind maps those
//! deployments onto trunk history, finds for every branch the newest
//! deployment at or before a target trunk commit, and reverts everything
//! that branch received after it.

pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod graph;
pub mod pipeline;
pub mod process;
pub mod revert;
pub mod rollback;
pub mod scan;

// Re-export commonly used types
pub use config::{BranchFailurePolicy, RollbackConfig, ServiceSelector};
pub use error::{
    GitError, GitHubError, GraphError, PipelineError, ProcessError, ResolveError, RevertError,
    ScanError,
};
pub use graph::{CommitGraph, DeploymentEvent, TrunkCommit};
pub use revert::{Author, BackendKind, BranchOutcome, RevertBackend, RevertReport};
pub use rollback::{PlanStatus, RevertPlan, RollbackPoint};
pub use scan::{ReleaseMarker, ScannedCommit};
