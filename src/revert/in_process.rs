//! Revert backend built on libgit2, for hosts without a `git` executable.
//!
//! Each commit is undone by applying its tree diff in reverse: paths the
//! commit added are removed, paths it deleted are restored from the parent,
//! and paths it modified get the parent's content back. Before a path is
//! touched, the working copy must still hold exactly what the commit left
//! there; anything else is a conflict.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{Commit, Delta, DiffDelta, FileMode, Index, Oid, PushOptions, Repository, Signature};
use tokio::sync::OwnedMutexGuard;
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{GitError, RevertError};
use crate::git::{WorkingCopy, branch_tip, remote_callbacks, restore_branch, worktree_lock};

use super::{RevertBackend, RevertReport, RevertRequest};

/// Reverts through libgit2 in a temporary worktree.
#[derive(Debug, Clone)]
pub struct InProcessBackend {
    repo_path: PathBuf,
    token: Option<String>,
}

impl InProcessBackend {
    pub fn new(repo_path: &Path, token: Option<String>) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            token,
        }
    }

    fn open(&self, branch: &str) -> Result<Repository, RevertError> {
        Repository::open(&self.repo_path).map_err(|source| RevertError::WorkingCopy {
            branch: branch.to_string(),
            source: GitError::OpenRepository {
                path: self.repo_path.display().to_string(),
                source,
            },
        })
    }

    /// Set up the worktree while `guard` is held, then revert without it.
    fn apply_blocking(
        &self,
        request: &RevertRequest,
        guard: OwnedMutexGuard<()>,
    ) -> Result<RevertReport, RevertError> {
        let branch = request.branch.as_str();
        let working_copy_err = |source| RevertError::WorkingCopy {
            branch: branch.to_string(),
            source,
        };

        let (copy, worktree, tip) = {
            let _guard = guard;
            let repo = self.open(branch)?;
            let copy = WorkingCopy::reserve(branch).map_err(working_copy_err)?;
            let worktree = copy.add(&repo).map_err(working_copy_err)?;
            let tip = branch_tip(&repo, branch).map_err(working_copy_err)?;
            (copy, worktree, tip)
        };

        let result = self.revert_all(&worktree, request);
        drop(worktree);

        match self.open(branch) {
            Ok(repo) => {
                copy.prune(&repo);
                if result.is_err()
                    && let Err(e) = restore_branch(&repo, branch, tip)
                {
                    warn!("{}: could not reset local branch to {}: {}", branch, tip, e);
                }
            }
            Err(e) => warn!("{}: could not clean up worktree: {}", branch, e),
        }
        result
    }

    /// Apply every revert, then push once. Nothing is pushed on failure.
    fn revert_all(
        &self,
        worktree: &Repository,
        request: &RevertRequest,
    ) -> Result<RevertReport, RevertError> {
        let branch = request.branch.as_str();
        let workdir = worktree.workdir().map(Path::to_path_buf).ok_or_else(|| {
            RevertError::WorkingCopy {
                branch: branch.to_string(),
                source: GitError::Worktree {
                    branch: branch.to_string(),
                    reason: "worktree has no working directory".to_string(),
                },
            }
        })?;
        let signature = Signature::now(&request.author.name, &request.author.email)
            .map_err(|source| git_err(branch, "signature", source))?;

        let mut reverted = Vec::new();
        let mut skipped_merges = Vec::new();

        for sha in &request.commits {
            let oid = Oid::from_str(sha).map_err(|source| git_err(branch, sha, source))?;
            let commit = worktree
                .find_commit(oid)
                .map_err(|source| git_err(branch, sha, source))?;

            match commit.parent_count() {
                0 => {
                    return Err(RevertError::MissingParent {
                        branch: branch.to_string(),
                        commit: sha.clone(),
                    });
                }
                1 => {}
                _ => {
                    warn!("{}: skipping merge commit {}", branch, sha);
                    skipped_merges.push(sha.clone());
                    continue;
                }
            }

            revert_commit(worktree, &workdir, branch, &commit, &signature)?;
            debug!("{}: reverted {}", branch, sha);
            reverted.push(sha.clone());
        }

        let pushed = if request.push && !reverted.is_empty() {
            self.push(worktree, branch)?;
            true
        } else {
            false
        };

        Ok(RevertReport {
            branch: branch.to_string(),
            reverted,
            skipped_merges,
            pushed,
            backend: "in-process",
        })
    }

    fn push(&self, repo: &Repository, branch: &str) -> Result<(), RevertError> {
        let push_err = |reason: String| RevertError::Push {
            branch: branch.to_string(),
            reason,
        };
        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| push_err(e.message().to_string()))?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

        let mut rejected = Vec::new();
        {
            let mut callbacks = remote_callbacks(self.token.clone());
            callbacks.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    rejected.push(format!("{refname}: {message}"));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(|e| push_err(e.message().to_string()))?;
        }

        if !rejected.is_empty() {
            return Err(push_err(rejected.join("; ")));
        }

        info!("{}: pushed to origin", branch);
        Ok(())
    }
}

#[async_trait]
impl RevertBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn apply(&self, request: &RevertRequest) -> Result<RevertReport, RevertError> {
        let guard = worktree_lock(&self.repo_path).lock_owned().await;
        let backend = self.clone();
        let owned = request.clone();

        task::spawn_blocking(move || backend.apply_blocking(&owned, guard))
            .await
            .map_err(|e| RevertError::Task {
                branch: request.branch.clone(),
                reason: e.to_string(),
            })?
    }
}

/// Commit message for the revert of `commit`.
pub fn revert_message(commit: &Commit) -> String {
    let summary = commit
        .message()
        .and_then(|m| m.lines().next())
        .unwrap_or("");
    format!("Revert \"{}\"\n\nThis reverts commit {}.", summary, commit.id())
}

/// Undo one single-parent commit and commit the result on HEAD.
fn revert_commit(
    repo: &Repository,
    workdir: &Path,
    branch: &str,
    commit: &Commit,
    signature: &Signature,
) -> Result<(), RevertError> {
    let sha = commit.id().to_string();
    let err = |source| git_err(branch, &sha, source);

    let parent = commit.parent(0).map_err(|_| RevertError::MissingParent {
        branch: branch.to_string(),
        commit: sha.clone(),
    })?;
    let diff = repo
        .diff_tree_to_tree(
            Some(&parent.tree().map_err(err)?),
            Some(&commit.tree().map_err(err)?),
            None,
        )
        .map_err(err)?;

    let mut index = repo.index().map_err(err)?;
    for delta in diff.deltas() {
        reverse_delta(repo, workdir, branch, &sha, &delta, &mut index)?;
    }
    index.write().map_err(err)?;

    let tree = repo
        .find_tree(index.write_tree().map_err(err)?)
        .map_err(err)?;
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(err)?;
    repo.commit(
        Some("HEAD"),
        signature,
        signature,
        &revert_message(commit),
        &tree,
        &[&head],
    )
    .map_err(err)?;

    Ok(())
}

fn reverse_delta(
    repo: &Repository,
    workdir: &Path,
    branch: &str,
    sha: &str,
    delta: &DiffDelta,
    index: &mut Index,
) -> Result<(), RevertError> {
    let err = |source| git_err(branch, sha, source);
    let new_file = delta.new_file();
    let old_file = delta.old_file();

    match delta.status() {
        Delta::Added => {
            let path = delta_path(new_file.path(), branch, sha)?;
            expect_content(repo, workdir, branch, sha, path, Some(new_file.id()))?;
            remove_file(workdir, branch, path)?;
            index.remove_path(path).map_err(err)?;
        }
        Delta::Deleted => {
            let path = delta_path(old_file.path(), branch, sha)?;
            expect_content(repo, workdir, branch, sha, path, None)?;
            restore_file(repo, workdir, branch, sha, path, old_file.id(), old_file.mode())?;
            index.add_path(path).map_err(err)?;
        }
        Delta::Modified | Delta::Typechange => {
            let path = delta_path(new_file.path(), branch, sha)?;
            expect_content(repo, workdir, branch, sha, path, Some(new_file.id()))?;
            restore_file(repo, workdir, branch, sha, path, old_file.id(), old_file.mode())?;
            index.add_path(path).map_err(err)?;
        }
        other => debug!("{}: ignoring {:?} delta in {}", branch, other, sha),
    }

    Ok(())
}

fn delta_path<'a>(path: Option<&'a Path>, branch: &str, sha: &str) -> Result<&'a Path, RevertError> {
    path.ok_or_else(|| git_err(branch, sha, git2::Error::from_str("diff entry without a path")))
}

/// The working copy must hold `expected` at `path`, or nothing when `None`.
fn expect_content(
    repo: &Repository,
    workdir: &Path,
    branch: &str,
    sha: &str,
    path: &Path,
    expected: Option<Oid>,
) -> Result<(), RevertError> {
    let full = workdir.join(path);
    let conflict = |detail: String| RevertError::Conflict {
        branch: branch.to_string(),
        commit: sha.to_string(),
        detail,
    };

    let current = match fs::read(&full) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(source) => return Err(io_err(branch, path, source)),
    };

    match (expected, current) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(conflict(format!(
            "{} exists but the commit deleted it",
            path.display()
        ))),
        (Some(_), None) => Err(conflict(format!(
            "{} is missing but the commit wrote it",
            path.display()
        ))),
        (Some(id), Some(bytes)) => {
            let blob = repo
                .find_blob(id)
                .map_err(|source| git_err(branch, sha, source))?;
            if blob.content() == bytes.as_slice() {
                Ok(())
            } else {
                Err(conflict(format!(
                    "{} was changed after the commit",
                    path.display()
                )))
            }
        }
    }
}

fn remove_file(workdir: &Path, branch: &str, path: &Path) -> Result<(), RevertError> {
    fs::remove_file(workdir.join(path)).map_err(|source| io_err(branch, path, source))
}

fn restore_file(
    repo: &Repository,
    workdir: &Path,
    branch: &str,
    sha: &str,
    path: &Path,
    id: Oid,
    mode: FileMode,
) -> Result<(), RevertError> {
    let blob = repo
        .find_blob(id)
        .map_err(|source| git_err(branch, sha, source))?;
    let full = workdir.join(path);

    if let Some(dir) = full.parent() {
        fs::create_dir_all(dir).map_err(|source| io_err(branch, path, source))?;
    }
    fs::write(&full, blob.content()).map_err(|source| io_err(branch, path, source))?;
    set_executable(&full, mode == FileMode::BlobExecutable)
        .map_err(|source| io_err(branch, path, source))
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    permissions.set_mode(if executable { mode | 0o111 } else { mode & !0o111 });
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> io::Result<()> {
    Ok(())
}

fn git_err(branch: &str, commit: &str, source: git2::Error) -> RevertError {
    RevertError::Git {
        branch: branch.to_string(),
        commit: commit.to_string(),
        source,
    }
}

fn io_err(branch: &str, path: &Path, source: io::Error) -> RevertError {
    RevertError::Io {
        branch: branch.to_string(),
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_message_uses_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let tree = repo.find_tree(repo.treebuilder(None).unwrap().write().unwrap()).unwrap();
        let oid = repo
            .commit(None, &sig, &sig, "deploy web/api\n\nbody text", &tree, &[])
            .unwrap();
        let commit = repo.find_commit(oid).unwrap();

        let message = revert_message(&commit);
        assert_eq!(
            message,
            format!("Revert \"deploy web/api\"\n\nThis reverts commit {oid}.")
        );
    }
}
