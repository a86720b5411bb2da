//! Trunk commit graph annotated with deployment events.

mod builder;
mod commit;

pub use builder::{GraphRequest, build_graph, extract_reference};
pub use commit::{CommitGraph, DeploymentEvent, TrunkCommit};
