use anyhow::{Context, Result};
use ci_digest_core::models::{PullRequestDetails, PullRequestRef, RunListing, WorkflowRun};

use crate::client::Client;

/// Everything RunDiscovery resolves for a PR: the head commit, the base
/// branch, and the full set of (run, attempt-number) pairs to process.
#[derive(Debug)]
pub struct Discovery {
    pub head_sha: String,
    pub base_branch: String,
    pub pairs: Vec<(WorkflowRun, u32)>,
}

/// Resolve the PR's head commit and base branch, list all workflow runs for
/// that head SHA, and expand each run into its attempt pairs. A fetch
/// failure at either step is fatal for the whole invocation.
pub async fn discover_runs(client: &Client, pr: &PullRequestRef) -> Result<Discovery> {
    let details: PullRequestDetails = client
        .get_json(&format!("/repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number))
        .await
        .with_context(|| format!("Failed to fetch details for PR #{}", pr.number))?;
    let head_sha = details.head.sha;
    let base_branch = details.base.name;
    tracing::info!("PR #{} head {} (base {})", pr.number, head_sha, base_branch);

    let listing: RunListing = client
        .get_json(&format!(
            "/repos/{}/{}/actions/runs?head_sha={}",
            pr.owner, pr.repo, head_sha
        ))
        .await
        .with_context(|| format!("Failed to list workflow runs for {head_sha}"))?;
    tracing::info!("Found {} workflow runs for {}", listing.workflow_runs.len(), head_sha);

    let pairs = listing.workflow_runs.into_iter().flat_map(expand_attempts).collect();
    Ok(Discovery { head_sha, base_branch, pairs })
}

/// Expand a run into one pair per attempt made so far. The latest attempt
/// reuses this run's metadata; earlier attempts are re-fetched later because
/// run-level fields differ per attempt.
pub fn expand_attempts(run: WorkflowRun) -> Vec<(WorkflowRun, u32)> {
    (1..=run.run_attempt.max(1)).map(|n| (run.clone(), n)).collect()
}
