use ci_digest_core::models::{FailureRecord, PullRequestRef};
use ci_digest_github::Summary;
use time::format_description::well_known::Rfc3339;

/// Render the final Markdown report from the sorted records and summary
/// counts. Pure formatting; the caller prints it to stdout.
pub fn render(
    pr: &PullRequestRef,
    records: &[FailureRecord],
    summary: &Summary,
    max_attempts: Option<u32>,
) -> String {
    let mut out = format!("# CI failures for {}/{} #{}\n\n", pr.owner, pr.repo, pr.number);
    if records.is_empty() {
        out.push_str("No CI failures found.\n");
        return out;
    }
    match max_attempts {
        Some(max) => out.push_str(&format!(
            "**{}/{} attempts had failures** ({} failed jobs)\n\n",
            summary.attempts_with_failures, max, summary.total_failed_jobs
        )),
        None => out.push_str(&format!(
            "**{} attempt(s) had failures** ({} failed jobs)\n\n",
            summary.attempts_with_failures, summary.total_failed_jobs
        )),
    }
    for record in records {
        out.push_str(&format!(
            "## {}: {} (attempt {})\n\n",
            record.workflow_name, record.job_name, record.attempt_number
        ));
        out.push_str(&format!(
            "Run [#{}]({}) on `{}`, started {}. [View log]({})\n\n",
            record.run_number,
            record.html_url,
            record.base_branch,
            record.created_at.format(&Rfc3339).unwrap_or_default(),
            record.log_url
        ));
        if record.failure_lines.is_empty() {
            out.push_str("_No specific failure lines found._\n\n");
        } else {
            out.push_str("```\n");
            for line in &record.failure_lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("```\n\n");
        }
    }
    out
}
