use serde::Deserialize;
use time::OffsetDateTime;

/// A pull request reference as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

/// The subset of PR details we need: head commit SHA and base branch name.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestDetails {
    pub head: CommitRef,
    pub base: BranchRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub name: String,
}

/// A workflow run as returned by the Actions API. `run_attempt` is the
/// number of attempts made so far, so the latest attempt is this run and
/// earlier attempts need a separate metadata fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    /// The API marks the run name nullable; both a missing key and an
    /// explicit `null` map to an empty name.
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    pub run_number: u64,
    #[serde(default = "default_run_attempt")]
    pub run_attempt: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub html_url: String,
}

fn default_run_attempt() -> u32 { 1 }

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where D: serde::Deserializer<'de> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunListing {
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    Stale,
    Neutral,
    ActionRequired,
    #[serde(other)]
    Other,
}

impl JobConclusion {
    /// Only these conclusions produce a FailureRecord; cancelled and
    /// skipped jobs carry no useful log evidence.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failure | Self::TimedOut | Self::Stale)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    /// `None` while the job is still in progress.
    pub conclusion: Option<JobConclusion>,
}

impl Job {
    pub fn is_failed(&self) -> bool {
        self.conclusion.is_some_and(JobConclusion::is_failed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobListing {
    pub jobs: Vec<Job>,
}

/// One failed job's evidence, immutable once built. In the final report
/// each `job_id` appears in at most one record, and no two entries of
/// `failure_lines` share a normalized form.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub workflow_name: String,
    pub job_name: String,
    pub attempt_number: u32,
    pub job_id: u64,
    pub log_url: String,
    pub failure_lines: Vec<String>,
    pub run_id: u64,
    pub run_number: u64,
    pub created_at: OffsetDateTime,
    pub html_url: String,
    pub base_branch: String,
}
