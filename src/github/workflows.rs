//! Workflow run queries and cancellation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GitHubError;

use super::client::{GitHubClient, MAX_PAGES, PER_PAGE};

/// Run statuses that can still change a deployment branch.
pub const ACTIVE_STATUSES: &[&str] = &["in_progress", "queued", "waiting", "pending"];

/// A GitHub Actions workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub workflow_id: u64,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Deserialize)]
struct RunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Serialize)]
struct RunParams<'a> {
    branch: &'a str,
    status: &'a str,
    per_page: usize,
    page: u32,
}

impl GitHubClient {
    /// List the runs on `branch` that are queued, waiting, pending or running.
    ///
    /// A failing query for one status is logged and skipped so that the
    /// remaining statuses are still reported.
    pub async fn list_active_workflow_runs(
        &self,
        branch: &str,
    ) -> Result<Vec<WorkflowRun>, GitHubError> {
        let route = self.route("actions/runs");
        let mut runs = Vec::new();

        for &status in ACTIVE_STATUSES {
            for page in 1..=MAX_PAGES {
                let params = RunParams {
                    branch,
                    status,
                    per_page: PER_PAGE,
                    page,
                };

                let result: Result<RunsPage, GitHubError> =
                    self.get_page("list workflow runs", &route, &params).await;
                let items = match result {
                    Ok(page) => page.workflow_runs,
                    Err(e) => {
                        warn!(
                            "Error listing {} workflow runs on {}: {}",
                            status, branch, e
                        );
                        break;
                    }
                };

                let last_page = items.len() < PER_PAGE;
                runs.extend(items);
                if last_page {
                    break;
                }
            }
        }

        Ok(runs)
    }

    /// Force-cancel a workflow run, bypassing `always()` conditions.
    ///
    /// GitHub acknowledges with HTTP 202; any other status is a rejection.
    pub async fn force_cancel_workflow_run(&self, run_id: u64) -> Result<(), GitHubError> {
        let route = self.route(&format!("actions/runs/{run_id}/force-cancel"));

        let response = self
            .octocrab
            ._post(route, None::<&()>)
            .await
            .map_err(|e| self.classify_error("force-cancel workflow run", e))?;

        let status = response.status().as_u16();
        if status != 202 {
            return Err(GitHubError::CancelRejected { run_id, status });
        }

        Ok(())
    }

    /// Disable a workflow so that no new runs start on any branch.
    ///
    /// GitHub acknowledges with HTTP 204; any other status is a rejection.
    pub async fn disable_workflow(&self, workflow_id: u64) -> Result<(), GitHubError> {
        let route = self.route(&format!("actions/workflows/{workflow_id}/disable"));

        let response = self
            .octocrab
            ._put(route, None::<&()>)
            .await
            .map_err(|e| self.classify_error("disable workflow", e))?;

        let status = response.status().as_u16();
        if status != 204 {
            return Err(GitHubError::DisableRejected {
                workflow_id,
                status,
            });
        }

        Ok(())
    }
}
