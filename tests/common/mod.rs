//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::build::TreeUpdateBuilder;
use git2::{FileMode, Oid, Repository, Signature, Time};

use rewind::config::{DEFAULT_BRANCH_PREFIX, RollbackConfig};
use rewind::{Author, BackendKind, BranchFailurePolicy};

/// Unix seconds `minutes` ago, so fixtures fall inside the default window.
pub fn minutes_ago(minutes: i64) -> i64 {
    Utc::now().timestamp() - minutes * 60
}

/// A 40-character identity built from one hex digit.
pub fn fake_sha(digit: char) -> String {
    digit.to_string().repeat(40)
}

/// Deployment commit message referencing a trunk commit.
pub fn deploy_message(tier_service: &str, trunk_sha: &str) -> String {
    format!("Deploy {tier_service}@{trunk_sha}")
}

/// A dry-run configuration rolling back to `target`.
pub fn config(target: &str) -> RollbackConfig {
    RollbackConfig {
        target: target.to_string(),
        owner: "acme".into(),
        repo: "deploy".into(),
        trunk: "master".into(),
        path: None,
        branch_prefix: DEFAULT_BRANCH_PREFIX.into(),
        ignore: Vec::new(),
        since_months: 1,
        depth: 0,
        selector: None,
        repo_path: None,
        rollback: false,
        push: false,
        force: false,
        backend: BackendKind::Auto,
        cancel_runs: false,
        graph_policy: BranchFailurePolicy::Skip,
        assume_yes: true,
        author: Author::default(),
    }
}

/// A bare "origin" holding deployment branches, plus clones of it.
///
/// History is written straight into the bare repository; tests then clone it
/// to get a working repository whose branches are remote-tracking refs.
pub struct DeployRepo {
    pub dir: tempfile::TempDir,
    pub origin: Repository,
}

impl DeployRepo {
    /// Create a bare origin with an initial commit on `master`.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let origin =
            Repository::init_bare(dir.path().join("origin.git")).expect("Failed to init bare repo");
        let repo = Self { dir, origin };

        repo.commit_on_branch("master", &[("README.md", Some("deployments\n"))], "init", minutes_ago(600));
        repo.origin
            .set_head("refs/heads/master")
            .expect("Failed to set HEAD");
        repo
    }

    pub fn origin_path(&self) -> &Path {
        self.origin.path()
    }

    fn signature(at: i64) -> Signature<'static> {
        Signature::new("Test User", "test@example.com", &Time::new(at, 0))
            .expect("Failed to create signature")
    }

    /// Current tip of `branch` in origin, if the branch exists.
    pub fn tip(&self, branch: &str) -> Option<Oid> {
        self.origin
            .refname_to_id(&format!("refs/heads/{branch}"))
            .ok()
    }

    /// Commit on `branch` in origin, starting the branch if needed.
    ///
    /// Each file entry is `(path, Some(content))` to write or `(path, None)`
    /// to delete.
    pub fn commit_on_branch(
        &self,
        branch: &str,
        files: &[(&str, Option<&str>)],
        message: &str,
        at: i64,
    ) -> Oid {
        let repo = &self.origin;
        let parent = self.tip(branch).map(|oid| repo.find_commit(oid).unwrap());
        let base_tree = match &parent {
            Some(commit) => commit.tree().unwrap(),
            None => repo
                .find_tree(repo.treebuilder(None).unwrap().write().unwrap())
                .unwrap(),
        };

        let mut update = TreeUpdateBuilder::new();
        for (path, content) in files {
            match content {
                Some(content) => {
                    let blob = repo.blob(content.as_bytes()).unwrap();
                    update.upsert(*path, blob, FileMode::Blob);
                }
                None => {
                    update.remove(*path);
                }
            }
        }
        let tree_id = update.create_updated(repo, &base_tree).unwrap();
        let tree = repo.find_tree(tree_id).unwrap();

        let sig = Self::signature(at);
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(
            Some(&format!("refs/heads/{branch}")),
            &sig,
            &sig,
            message,
            &tree,
            &parents,
        )
        .expect("Failed to commit")
    }

    /// Merge `other` into `branch`, keeping the tree of `branch`.
    pub fn merge_on_branch(&self, branch: &str, other: Oid, message: &str, at: i64) -> Oid {
        let repo = &self.origin;
        let ours = repo.find_commit(self.tip(branch).unwrap()).unwrap();
        let theirs = repo.find_commit(other).unwrap();
        let tree = ours.tree().unwrap();
        let sig = Self::signature(at);

        repo.commit(
            Some(&format!("refs/heads/{branch}")),
            &sig,
            &sig,
            message,
            &tree,
            &[&ours, &theirs],
        )
        .expect("Failed to create merge commit")
    }

    /// Content of `path` at the tip of `branch` in origin.
    pub fn file_at(&self, branch: &str, path: &str) -> Option<String> {
        let commit = self.origin.find_commit(self.tip(branch)?).ok()?;
        let entry = commit.tree().ok()?.get_path(Path::new(path)).ok()?;
        let blob = self.origin.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).to_string())
    }

    /// First-parent messages of `branch` in origin, newest first.
    pub fn messages(&self, branch: &str) -> Vec<String> {
        let mut messages = Vec::new();
        let mut current = self.tip(branch).and_then(|oid| self.origin.find_commit(oid).ok());
        while let Some(commit) = current {
            messages.push(commit.message().unwrap_or("").to_string());
            current = commit.parent(0).ok();
        }
        messages
    }

    /// Clone origin into a new directory under the fixture root.
    pub fn clone(&self, name: &str) -> PathBuf {
        let dest = self.dir.path().join(name);
        let url = self.origin_path().to_str().expect("utf-8 temp path");
        Repository::clone(url, &dest).expect("Failed to clone origin");
        dest
    }
}

/// Tip of the local branch in a clone, if it exists.
pub fn local_tip(clone: &Path, branch: &str) -> Option<Oid> {
    Repository::open(clone)
        .ok()?
        .refname_to_id(&format!("refs/heads/{branch}"))
        .ok()
}
