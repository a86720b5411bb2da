//! Integration tests for the libgit2 revert backend.

mod common;

use chrono::Utc;
use common::{DeployRepo, local_tip, minutes_ago};
use rewind::error::RevertError;
use rewind::git::LocalRepository;
use rewind::revert::{InProcessBackend, RevertBackend, RevertRequest};
use rewind::rollback::{PlanWindow, compute_revert_plan};
use rewind::{Author, DeploymentEvent, RollbackPoint};

const BRANCH: &str = "gitops/a";

/// D1 writes a.yaml and b.yaml, D2 modifies a.yaml, D3 adds c.yaml, D4 deletes b.yaml.
fn history(repo: &DeployRepo) -> Vec<String> {
    let steps: [(&[(&str, Option<&str>)], &str); 4] = [
        (&[("a.yaml", Some("v1\n")), ("b.yaml", Some("keep\n"))], "D1"),
        (&[("a.yaml", Some("v2\n"))], "D2"),
        (&[("c.yaml", Some("new\n"))], "D3"),
        (&[("b.yaml", None)], "D4"),
    ];

    steps
        .iter()
        .enumerate()
        .map(|(i, (files, message))| {
            repo.commit_on_branch(BRANCH, files, message, minutes_ago(100 - i as i64))
                .to_string()
        })
        .collect()
}

fn request(commits: &[&String], push: bool) -> RevertRequest {
    RevertRequest {
        branch: BRANCH.to_string(),
        commits: commits.iter().map(|s| s.to_string()).collect(),
        force: false,
        push,
        author: Author {
            name: "Rollback Bot".into(),
            email: "bot@example.com".into(),
        },
    }
}

#[tokio::test]
async fn test_reverts_additions_deletions_and_modifications() {
    let repo = DeployRepo::new();
    let d = history(&repo);
    let clone = repo.clone("work");

    let backend = InProcessBackend::new(&clone, None);
    let report = backend
        .apply(&request(&[&d[3], &d[2], &d[1]], true))
        .await
        .unwrap();

    assert_eq!(report.reverted, vec![d[3].clone(), d[2].clone(), d[1].clone()]);
    assert!(report.pushed);
    assert!(report.skipped_merges.is_empty());

    assert_eq!(repo.file_at(BRANCH, "a.yaml").as_deref(), Some("v1\n"));
    assert_eq!(repo.file_at(BRANCH, "b.yaml").as_deref(), Some("keep\n"));
    assert_eq!(repo.file_at(BRANCH, "c.yaml"), None);

    let messages = repo.messages(BRANCH);
    assert_eq!(
        messages[0],
        format!("Revert \"D2\"\n\nThis reverts commit {}.", d[1])
    );
    assert!(messages[2].starts_with("Revert \"D4\""));

    let origin = git2::Repository::open_bare(repo.origin_path()).unwrap();
    let head = origin
        .find_commit(repo.tip(BRANCH).unwrap())
        .unwrap();
    assert_eq!(head.author().name(), Some("Rollback Bot"));
}

#[tokio::test]
async fn test_without_push_origin_is_untouched() {
    let repo = DeployRepo::new();
    let d = history(&repo);
    let clone = repo.clone("work");
    let before = repo.tip(BRANCH);

    let backend = InProcessBackend::new(&clone, None);
    let report = backend.apply(&request(&[&d[3]], false)).await.unwrap();

    assert!(!report.pushed);
    assert_eq!(repo.tip(BRANCH), before);
    assert_ne!(local_tip(&clone, BRANCH).map(|o| o.to_string()), Some(d[3].clone()));
}

#[tokio::test]
async fn test_merge_commits_are_skipped_and_recorded() {
    let repo = DeployRepo::new();
    let d = history(&repo);
    let side = repo.commit_on_branch("side", &[("z.yaml", Some("z\n"))], "side", minutes_ago(50));
    let merge = repo
        .merge_on_branch(BRANCH, side, "Merge side", minutes_ago(40))
        .to_string();
    let clone = repo.clone("work");

    let backend = InProcessBackend::new(&clone, None);
    let report = backend
        .apply(&request(&[&merge, &d[3]], true))
        .await
        .unwrap();

    assert_eq!(report.skipped_merges, vec![merge]);
    assert_eq!(report.reverted, vec![d[3].clone()]);
    assert_eq!(repo.file_at(BRANCH, "b.yaml").as_deref(), Some("keep\n"));
}

#[tokio::test]
async fn test_conflict_names_commit_and_pushes_nothing() {
    let repo = DeployRepo::new();
    let d = history(&repo);
    // D5 rewrites a.yaml again, so D2 can no longer be undone on its own.
    let d5 = repo
        .commit_on_branch(BRANCH, &[("a.yaml", Some("v3\n"))], "D5", minutes_ago(10))
        .to_string();
    let clone = repo.clone("work");
    let before = repo.tip(BRANCH);

    let backend = InProcessBackend::new(&clone, None);
    let result = backend.apply(&request(&[&d[3], &d[1]], true)).await;

    match result {
        Err(RevertError::Conflict { commit, branch, .. }) => {
            assert_eq!(commit, d[1]);
            assert_eq!(branch, BRANCH);
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
    assert_eq!(repo.tip(BRANCH), before);
    assert_eq!(
        local_tip(&clone, BRANCH).map(|o| o.to_string()),
        Some(d5.clone())
    );
}

#[tokio::test]
async fn test_plan_is_empty_after_full_revert() {
    let repo = DeployRepo::new();
    let d = history(&repo);
    let clone = repo.clone("work");

    let backend = InProcessBackend::new(&clone, None);
    backend
        .apply(&request(&[&d[3], &d[2], &d[1]], true))
        .await
        .unwrap();

    let fresh = repo.clone("fresh");
    let source = LocalRepository::open(&fresh).unwrap();
    let point = RollbackPoint {
        deployment: DeploymentEvent {
            sha: d[0].clone(),
            timestamp: Utc::now(),
        },
        trunk_sha: "t1".into(),
    };
    let plan = compute_revert_plan(&source, BRANCH, &point, PlanWindow::default()).unwrap();

    assert!(plan.is_empty(), "unexpected plan: {:?}", plan.commits);
}

#[tokio::test]
async fn test_root_commit_cannot_be_reverted() {
    let repo = DeployRepo::new();
    let d = history(&repo);
    let clone = repo.clone("work");

    let backend = InProcessBackend::new(&clone, None);
    let result = backend.apply(&request(&[&d[0]], false)).await;

    assert!(matches!(result, Err(RevertError::MissingParent { commit, .. }) if commit == d[0]));
}
