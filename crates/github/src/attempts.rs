use std::sync::Arc;

use anyhow::{Context, Result};
use ci_digest_core::{
    models::{FailureRecord, Job, JobListing, WorkflowRun},
    signal::extract_failure_lines,
};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{DigestContext, aggregate::MAX_POOL};

const JOBS_PER_PAGE: usize = 100;

/// Process one concrete run-attempt: list its jobs, filter to failed ones,
/// and build a FailureRecord per failed job over a bounded worker pool.
/// Errors here are attempt-scoped: they log and yield an empty list without
/// touching sibling attempts.
pub async fn process_attempt(
    ctx: &DigestContext,
    run: &WorkflowRun,
    attempt_number: u32,
) -> Vec<FailureRecord> {
    let run = if attempt_number != run.run_attempt {
        match fetch_attempt_metadata(ctx, run.id, attempt_number).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                tracing::warn!(
                    "No metadata for run {} attempt {}, skipping",
                    run.id,
                    attempt_number
                );
                return vec![];
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to fetch metadata for run {} attempt {}: {:?}",
                    run.id,
                    attempt_number,
                    e
                );
                return vec![];
            }
        }
    } else {
        run.clone()
    };

    let jobs = match list_attempt_jobs(ctx, run.id, attempt_number).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!(
                "Failed to list jobs for run {} attempt {}: {:?}",
                run.id,
                attempt_number,
                e
            );
            return vec![];
        }
    };
    let failed: Vec<Job> = jobs.into_iter().filter(Job::is_failed).collect();
    if failed.is_empty() {
        return vec![];
    }
    tracing::info!(
        "Run {} attempt {}: {} failed jobs",
        run.id,
        attempt_number,
        failed.len()
    );

    let sem = Arc::new(Semaphore::new(failed.len().min(MAX_POOL)));
    let mut set = JoinSet::new();
    for job in failed {
        let sem = sem.clone();
        let ctx = ctx.clone();
        let run = run.clone();
        set.spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            build_record(&ctx, &run, attempt_number, job).await
        });
    }
    let mut records = Vec::new();
    while let Some(join_result) = set.join_next().await {
        match join_result {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::error!(
                    "Job task failed for run {} attempt {}: {:?}",
                    run.id,
                    attempt_number,
                    e
                );
            }
        }
    }
    records
}

/// A failed job always produces a record; a missing or unfetchable log just
/// leaves `failure_lines` empty.
async fn build_record(
    ctx: &DigestContext,
    run: &WorkflowRun,
    attempt_number: u32,
    job: Job,
) -> FailureRecord {
    let failure_lines = match fetch_job_log(ctx, job.id).await {
        Ok(Some(log)) => extract_failure_lines(&log, &ctx.match_config),
        Ok(None) => {
            tracing::debug!("No log available for job {} ({})", job.id, job.name);
            vec![]
        }
        Err(e) => {
            tracing::warn!("Failed to fetch log for job {} ({}): {:?}", job.id, job.name, e);
            vec![]
        }
    };
    FailureRecord {
        workflow_name: run.name.clone(),
        job_name: job.name,
        attempt_number,
        job_id: job.id,
        log_url: format!("{}/job/{}", run.html_url, job.id),
        failure_lines,
        run_id: run.id,
        run_number: run.run_number,
        created_at: run.created_at,
        html_url: run.html_url.clone(),
        base_branch: ctx.base_branch.clone(),
    }
}

/// Fetch attempt-specific run metadata. Needed for every attempt except the
/// latest, whose metadata the runs listing already carries. Non-2xx yields
/// `None`.
async fn fetch_attempt_metadata(
    ctx: &DigestContext,
    run_id: u64,
    attempt_number: u32,
) -> Result<Option<WorkflowRun>> {
    let path = format!(
        "/repos/{}/{}/actions/runs/{}/attempts/{}",
        ctx.owner, ctx.repo, run_id, attempt_number
    );
    let response = ctx.client.get(&path).await?;
    if !response.is_success() {
        return Ok(None);
    }
    let run = serde_json::from_str(&response.body)
        .with_context(|| format!("Failed to parse response from {path}"))?;
    Ok(Some(run))
}

/// List all jobs for a run attempt, paginating until a short or empty page.
/// The attempt-scoped listing can come back empty while a direct jobs-by-run
/// query succeeds, so fall back to that before giving up.
async fn list_attempt_jobs(
    ctx: &DigestContext,
    run_id: u64,
    attempt_number: u32,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    let mut page = 1u32;
    loop {
        let path = format!(
            "/repos/{}/{}/actions/runs/{}/attempts/{}/jobs?per_page={}&filter=all&page={}",
            ctx.owner, ctx.repo, run_id, attempt_number, JOBS_PER_PAGE, page
        );
        let response = ctx.client.get(&path).await?;
        if !response.is_success() {
            tracing::warn!(
                "Jobs listing for run {} attempt {} page {} returned {}",
                run_id,
                attempt_number,
                page,
                response.status
            );
            break;
        }
        let listing: JobListing = serde_json::from_str(&response.body)
            .with_context(|| format!("Failed to parse response from {path}"))?;
        let count = listing.jobs.len();
        jobs.extend(listing.jobs);
        if count < JOBS_PER_PAGE {
            break;
        }
        page += 1;
    }
    if jobs.is_empty() {
        let path = format!(
            "/repos/{}/{}/actions/jobs?run_id={}&per_page={}",
            ctx.owner, ctx.repo, run_id, JOBS_PER_PAGE
        );
        let response = ctx.client.get(&path).await?;
        if response.is_success()
            && let Ok(listing) = serde_json::from_str::<JobListing>(&response.body)
        {
            jobs = listing.jobs;
        }
    }
    Ok(jobs)
}

/// Fetch one job's raw log. Non-2xx (commonly 404 for expired or re-run
/// logs) is not an error, it means no evidence is available.
pub async fn fetch_job_log(ctx: &DigestContext, job_id: u64) -> Result<Option<String>> {
    let path = format!("/repos/{}/{}/actions/jobs/{}/logs", ctx.owner, ctx.repo, job_id);
    let response = ctx.client.get(&path).await?;
    if !response.is_success() {
        return Ok(None);
    }
    Ok(Some(response.body))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use ci_digest_core::signal::MatchConfig;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::client::Client;

    async fn serve_once(listener: TcpListener, response: String) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut request = Vec::new();
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
    }

    /// Serve a fixed sequence of responses, one connection each, and
    /// return the request paths seen. Hangs if the caller issues fewer
    /// requests than scripted, so scripts must match the exact flow.
    async fn serve_script(listener: TcpListener, responses: Vec<String>) -> Vec<String> {
        let mut paths = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&request);
            let path = request.split_whitespace().nth(1).unwrap_or_default().to_string();
            paths.push(path);
            socket.write_all(response.as_bytes()).await.unwrap();
        }
        paths
    }

    fn ok_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn not_found_response() -> String {
        "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string()
    }

    fn run_with_attempts(run_attempt: u32) -> WorkflowRun {
        serde_json::from_value(serde_json::json!({
            "id": 9,
            "name": "CI",
            "run_number": 3,
            "run_attempt": run_attempt,
            "created_at": "2024-05-01T12:00:00Z",
            "html_url": "https://github.com/acme/widget/actions/runs/9",
        }))
        .unwrap()
    }

    async fn context(base: &str) -> DigestContext {
        DigestContext {
            client: Client::with_limits("token", base, 1, Duration::from_secs(5)).unwrap(),
            owner: "acme".to_string(),
            repo: "widget".to_string(),
            base_branch: "main".to_string(),
            match_config: Arc::new(MatchConfig::default()),
        }
    }

    #[tokio::test]
    async fn latest_attempt_skips_the_metadata_fetch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_script(
            listener,
            vec![
                ok_response(r#"{"jobs": [{"id": 70, "name": "build", "conclusion": "failure"}]}"#),
                ok_response("ERROR: boom\n"),
            ],
        ));

        let ctx = context(&base).await;
        let run = run_with_attempts(1);
        let records = process_attempt(&ctx, &run, 1).await;
        let paths = server.await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_lines, vec!["ERROR: boom".to_string()]);
        assert_eq!(
            paths[0],
            "/repos/acme/widget/actions/runs/9/attempts/1/jobs?per_page=100&filter=all&page=1"
        );
        assert!(!paths.iter().any(|p| p.ends_with("/attempts/1")));
    }

    #[tokio::test]
    async fn missing_attempt_metadata_skips_the_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_script(listener, vec![not_found_response()]));

        let ctx = context(&base).await;
        let run = run_with_attempts(2);
        let records = process_attempt(&ctx, &run, 1).await;
        let paths = server.await.unwrap();

        assert!(records.is_empty());
        assert_eq!(paths, vec!["/repos/acme/widget/actions/runs/9/attempts/1".to_string()]);
    }

    #[tokio::test]
    async fn empty_attempt_listing_falls_back_to_jobs_by_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_script(
            listener,
            vec![
                ok_response(r#"{"jobs": []}"#),
                ok_response(r#"{"jobs": [{"id": 71, "name": "lint", "conclusion": "failure"}]}"#),
                not_found_response(),
            ],
        ));

        let ctx = context(&base).await;
        let run = run_with_attempts(1);
        let records = process_attempt(&ctx, &run, 1).await;
        let paths = server.await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].job_name, "lint");
        assert!(records[0].failure_lines.is_empty());
        assert_eq!(paths[1], "/repos/acme/widget/actions/jobs?run_id=9&per_page=100");
    }

    #[tokio::test]
    async fn jobs_listing_paginates_until_a_short_page() {
        let full_page = format!(
            r#"{{"jobs": [{}]}}"#,
            (0..JOBS_PER_PAGE)
                .map(|i| format!(r#"{{"id": {i}, "name": "ok-{i}", "conclusion": "success"}}"#))
                .collect::<Vec<_>>()
                .join(",")
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_script(
            listener,
            vec![
                ok_response(&full_page),
                ok_response(r#"{"jobs": [{"id": 200, "name": "ok-200", "conclusion": "success"}]}"#),
            ],
        ));

        let ctx = context(&base).await;
        let run = run_with_attempts(1);
        let records = process_attempt(&ctx, &run, 1).await;
        let paths = server.await.unwrap();

        assert!(records.is_empty());
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("page=1"));
        assert!(paths[1].ends_with("page=2"));
    }

    #[tokio::test]
    async fn missing_log_yields_no_evidence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_string(),
        ));

        let ctx = context(&base).await;
        let log = fetch_job_log(&ctx, 55).await.unwrap();
        assert_eq!(log, None);
    }

    #[tokio::test]
    async fn available_log_is_returned_verbatim() {
        let body = "line one\nERROR: boom\n";
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_once(
            listener,
            format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            ),
        ));

        let ctx = context(&base).await;
        let log = fetch_job_log(&ctx, 55).await.unwrap();
        assert_eq!(log.as_deref(), Some(body));
    }
}
