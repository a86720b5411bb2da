//! rewind - CLI entry point.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use git2::Repository;
use tracing_subscriber::EnvFilter;

use rewind::config::{DEFAULT_BRANCH_PREFIX, DEFAULT_IGNORED_BRANCHES};
use rewind::github::parse_github_remote;
use rewind::pipeline::run_rollback;
use rewind::{Author, BackendKind, BranchFailurePolicy, RollbackConfig, ServiceSelector};

/// Roll deployment branches back to the state they had at a trunk commit.
#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(about = "Roll GitOps deployment branches back to a trunk commit")]
#[command(version)]
struct Cli {
    /// Trunk commit to roll back to (full 40-character sha)
    #[arg(long)]
    target: String,

    /// Repository owner (defaults to the origin remote of --repo-path)
    #[arg(long)]
    owner: Option<String>,

    /// Repository name (defaults to the origin remote of --repo-path)
    #[arg(long)]
    repo: Option<String>,

    /// Trunk branch whose history is rolled back
    #[arg(long, default_value = "master")]
    trunk: String,

    /// Only count deployment commits touching this path
    #[arg(long)]
    path: Option<String>,

    /// Prefix shared by deployment branches
    #[arg(long, default_value = DEFAULT_BRANCH_PREFIX)]
    branch_prefix: String,

    /// Deployment branches to leave alone (repeatable, replaces the defaults)
    #[arg(long = "ignore")]
    ignore: Vec<String>,

    /// How many months of history to inspect
    #[arg(long, default_value_t = 1)]
    since_months: u32,

    /// Clone depth and per-branch commit limit (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    depth: u32,

    /// Tier of the service to roll back (requires --service)
    #[arg(long, requires = "service")]
    tier: Option<String>,

    /// Service to roll back; limits the rollback to branches running it
    #[arg(long, requires = "tier")]
    service: Option<String>,

    /// Use an existing clone instead of cloning into a temporary directory
    #[arg(long)]
    repo_path: Option<PathBuf>,

    /// Apply the reverts (default is a dry run that only prints the plan)
    #[arg(long)]
    rollback: bool,

    /// Push reverted branches to origin
    #[arg(long, requires = "rollback")]
    push: bool,

    /// Skip commit signing for revert commits
    #[arg(long)]
    force: bool,

    /// Revert backend: auto, cli or in-process
    #[arg(long, default_value = "auto")]
    backend: BackendKind,

    /// Force-cancel active workflow runs on branches before reverting
    #[arg(long)]
    cancel_runs: bool,

    /// Fail when any deployment branch cannot be read while building the graph
    #[arg(long)]
    strict_graph: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Author name for revert commits
    #[arg(long)]
    author_name: Option<String>,

    /// Author email for revert commits
    #[arg(long)]
    author_email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rewind=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = build_config(cli)?;

    run_rollback(config).await.context("Rollback failed")?;
    Ok(())
}

fn build_config(cli: Cli) -> Result<RollbackConfig> {
    if cli.target.len() != 40 || !cli.target.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("--target must be a full 40-character commit sha");
    }

    let (owner, repo) = match (cli.owner, cli.repo) {
        (Some(owner), Some(repo)) => (owner, repo),
        (owner, repo) => {
            let (remote_owner, remote_repo) = origin_of(cli.repo_path.as_ref())?;
            (owner.unwrap_or(remote_owner), repo.unwrap_or(remote_repo))
        }
    };

    let ignore = if cli.ignore.is_empty() {
        DEFAULT_IGNORED_BRANCHES.iter().map(|b| b.to_string()).collect()
    } else {
        cli.ignore
    };

    let defaults = Author::default();
    let author = Author {
        name: cli.author_name.unwrap_or(defaults.name),
        email: cli.author_email.unwrap_or(defaults.email),
    };

    Ok(RollbackConfig {
        target: cli.target.to_ascii_lowercase(),
        owner,
        repo,
        trunk: cli.trunk,
        path: cli.path,
        branch_prefix: cli.branch_prefix,
        ignore,
        since_months: cli.since_months,
        depth: cli.depth,
        selector: cli
            .tier
            .zip(cli.service)
            .map(|(tier, service)| ServiceSelector { tier, service }),
        repo_path: cli.repo_path,
        rollback: cli.rollback,
        push: cli.push,
        force: cli.force,
        backend: cli.backend,
        cancel_runs: cli.cancel_runs,
        graph_policy: if cli.strict_graph {
            BranchFailurePolicy::FailFast
        } else {
            BranchFailurePolicy::Skip
        },
        assume_yes: cli.yes,
        author,
    })
}

/// Owner and repo of the `origin` remote of `path` (or the current directory).
fn origin_of(path: Option<&PathBuf>) -> Result<(String, String)> {
    let path = path.cloned().unwrap_or_else(|| PathBuf::from("."));
    let repo = Repository::open(&path).with_context(|| {
        format!(
            "--owner/--repo not given and {} is not a git repository",
            path.display()
        )
    })?;
    let remote = repo
        .find_remote("origin")
        .context("No 'origin' remote found")?;
    let url = remote.url().context("Remote has no URL")?;
    parse_github_remote(url).context("Could not parse GitHub remote URL")
}
