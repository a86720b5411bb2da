//! Integration tests for graph building, rollback resolution and revert
//! planning against a real repository.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::{DeployRepo, config, deploy_message, fake_sha, minutes_ago};
use rewind::error::{PipelineError, ResolveError};
use rewind::git::LocalRepository;
use rewind::pipeline::plan_rollback;
use rewind::{PlanStatus, ServiceSelector, TrunkCommit};

struct Fixture {
    repo: DeployRepo,
    trunk: Vec<TrunkCommit>,
    /// (branch, deployment sha) for every deployment commit, in creation order.
    deploys: Vec<(String, String)>,
}

impl Fixture {
    fn deployed(&self, branch: &str, index: usize) -> String {
        self.deploys
            .iter()
            .filter(|(b, _)| b == branch)
            .nth(index)
            .map(|(_, sha)| sha.clone())
            .unwrap()
    }
}

fn trunk_sha(n: u32) -> String {
    fake_sha(char::from_digit(n, 16).unwrap())
}

/// Trunk T1 <- T2 <- T3 <- T4.
///
/// gitops/a deployed T1 then T3, gitops/b deployed T2 then T4,
/// gitops/worker only ever ran another service.
fn fixture() -> Fixture {
    let repo = DeployRepo::new();
    let trunk: Vec<TrunkCommit> = (1..=4)
        .map(|n| {
            let parent = (n > 1).then(|| trunk_sha(n - 1));
            TrunkCommit::seed(
                &trunk_sha(n),
                parent.as_deref(),
                Utc.timestamp_opt(minutes_ago(500 - n as i64 * 10), 0).unwrap(),
            )
        })
        .collect();

    let plan = [
        ("gitops/a", 1, 400),
        ("gitops/b", 2, 390),
        ("gitops/a", 3, 380),
        ("gitops/b", 4, 370),
    ];
    let mut deploys = Vec::new();
    for (branch, n, ago) in plan {
        let content = format!("image: api:{}\n", trunk_sha(n));
        let oid = repo.commit_on_branch(
            branch,
            &[("manifests/prod/api.yaml", Some(content.as_str()))],
            &deploy_message("web/api", &trunk_sha(n)),
            minutes_ago(ago),
        );
        deploys.push((branch.to_string(), oid.to_string()));
    }
    repo.commit_on_branch(
        "gitops/worker",
        &[("manifests/prod/worker.yaml", Some("image: worker:1\n"))],
        &deploy_message("batch/worker", &trunk_sha(9)),
        minutes_ago(360),
    );

    Fixture {
        repo,
        trunk,
        deploys,
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_plans_revert_everything_after_each_rollback_point() {
    let fx = fixture();
    let clone = fx.repo.clone("work");
    let local = Arc::new(LocalRepository::open(&clone).unwrap());

    let planning = plan_rollback(
        local,
        fx.trunk.clone(),
        &names(&["gitops/a", "gitops/b"]),
        &config(&trunk_sha(3)),
    )
    .await
    .unwrap();

    // a deployed T3 itself; b last deployed T2 before T3.
    assert_eq!(planning.points["gitops/a"].trunk_sha, trunk_sha(3));
    assert_eq!(planning.points["gitops/b"].trunk_sha, trunk_sha(2));

    let plan_a = &planning.plans["gitops/a"];
    assert!(plan_a.is_empty());
    assert_eq!(plan_a.status, PlanStatus::Complete);

    let plan_b = &planning.plans["gitops/b"];
    assert_eq!(plan_b.rollback_to, fx.deployed("gitops/b", 0));
    assert_eq!(plan_b.commits, vec![fx.deployed("gitops/b", 1)]);
}

#[tokio::test]
async fn test_older_target_walks_further_back() {
    let fx = fixture();
    let clone = fx.repo.clone("work");
    let local = Arc::new(LocalRepository::open(&clone).unwrap());

    let planning = plan_rollback(
        local,
        fx.trunk.clone(),
        &names(&["gitops/a"]),
        &config(&trunk_sha(2)),
    )
    .await
    .unwrap();

    assert_eq!(planning.points["gitops/a"].trunk_sha, trunk_sha(1));
    assert_eq!(
        planning.plans["gitops/a"].commits,
        vec![fx.deployed("gitops/a", 1)]
    );
}

#[tokio::test]
async fn test_branch_without_deployments_is_unresolved() {
    let fx = fixture();
    let clone = fx.repo.clone("work");
    let local = Arc::new(LocalRepository::open(&clone).unwrap());

    let result = plan_rollback(
        local,
        fx.trunk.clone(),
        &names(&["gitops/a", "gitops/worker"]),
        &config(&trunk_sha(4)),
    )
    .await;

    match result {
        Err(PipelineError::Resolve(ResolveError::Unresolved { branches, .. })) => {
            assert_eq!(branches, names(&["gitops/worker"]));
        }
        other => panic!("expected Unresolved, got {other:?}"),
    }
}

#[tokio::test]
async fn test_service_selector_narrows_to_affected_branches() {
    let fx = fixture();
    let clone = fx.repo.clone("work");
    let local = Arc::new(LocalRepository::open(&clone).unwrap());

    let mut cfg = config(&trunk_sha(3));
    cfg.selector = Some(ServiceSelector {
        tier: "web".into(),
        service: "api".into(),
    });

    let planning = plan_rollback(
        local,
        fx.trunk.clone(),
        &names(&["gitops/a", "gitops/b", "gitops/worker"]),
        &cfg,
    )
    .await
    .unwrap();

    // a runs T3 (the target), b runs T4 (later); worker never ran web/api.
    assert_eq!(planning.branches, names(&["gitops/a", "gitops/b"]));
    assert_eq!(planning.plans.len(), 2);
}

#[tokio::test]
async fn test_unknown_target_fails() {
    let fx = fixture();
    let clone = fx.repo.clone("work");
    let local = Arc::new(LocalRepository::open(&clone).unwrap());

    let result = plan_rollback(
        local,
        fx.trunk.clone(),
        &names(&["gitops/a"]),
        &config(&fake_sha('f')),
    )
    .await;

    assert!(matches!(
        result,
        Err(PipelineError::Resolve(ResolveError::TargetNotFound(_)))
    ));
}

#[tokio::test]
async fn test_path_filter_ignores_deployments_elsewhere() {
    let fx = fixture();
    // A newer deployment of T4 on a that only touches docs.
    fx.repo.commit_on_branch(
        "gitops/a",
        &[("docs/notes.md", Some("note\n"))],
        &deploy_message("web/api", &trunk_sha(4)),
        minutes_ago(350),
    );
    let clone = fx.repo.clone("work");
    let local = Arc::new(LocalRepository::open(&clone).unwrap());

    let mut cfg = config(&trunk_sha(4));
    cfg.path = Some("manifests/prod".into());
    let planning = plan_rollback(local, fx.trunk.clone(), &names(&["gitops/a"]), &cfg)
        .await
        .unwrap();

    // Without the docs deployment, a's newest point at or before T4 is T3.
    assert_eq!(planning.points["gitops/a"].trunk_sha, trunk_sha(3));
    assert_eq!(planning.plans["gitops/a"].commits.len(), 1);
}
