//! Cloning the deployment repository.

use std::path::Path;

use git2::build::RepoBuilder;
use git2::{AutotagOption, FetchOptions, Repository};
use tracing::info;

use crate::error::GitError;

use super::credentials::remote_callbacks;

/// Clone `url` into `dest` with every branch as a remote-tracking ref.
///
/// A non-zero `depth` produces a shallow clone. Tags are not fetched.
pub fn clone_repository(
    url: &str,
    dest: &Path,
    depth: u32,
    token: Option<&str>,
) -> Result<Repository, GitError> {
    info!("Cloning {} into {}", url, dest.display());

    let mut fetch = FetchOptions::new();
    fetch
        .remote_callbacks(remote_callbacks(token.map(str::to_string)))
        .download_tags(AutotagOption::None);
    if depth > 0 {
        let depth = i32::try_from(depth).map_err(|_| GitError::InvalidDepth(depth))?;
        fetch.depth(depth);
    }

    RepoBuilder::new()
        .fetch_options(fetch)
        .clone(url, dest)
        .map_err(|source| GitError::Clone {
            url: url.to_string(),
            source,
        })
}
