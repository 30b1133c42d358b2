use std::{collections::HashSet, sync::Arc};

use ci_digest_core::models::{FailureRecord, WorkflowRun};
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinSet,
};

use crate::{DigestContext, attempts::process_attempt};

/// Cap for both fan-out levels, regardless of how many pairs or jobs a PR
/// actually has.
pub const MAX_POOL: usize = 10;

/// Summary counts for the report header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Number of distinct attempt numbers represented in the records.
    pub attempts_with_failures: usize,
    pub total_failed_jobs: usize,
}

#[derive(Default)]
struct Collected {
    seen_jobs: HashSet<u64>,
    records: Vec<FailureRecord>,
}

/// Fan AttemptProcessor out over all (run, attempt) pairs on a bounded pool
/// and merge the results. The seen-jobs set decides identity: the first
/// record observed for a job id wins, which is fine because content for the
/// same id is stable. Completion order is non-deterministic; callers get
/// determinism from [`finalize`].
pub async fn collect_failures(
    ctx: &DigestContext,
    pairs: Vec<(WorkflowRun, u32)>,
) -> Vec<FailureRecord> {
    if pairs.is_empty() {
        return vec![];
    }
    let sem = Arc::new(Semaphore::new(pairs.len().min(MAX_POOL)));
    let collected = Arc::new(Mutex::new(Collected::default()));
    let mut set = JoinSet::new();
    for (run, attempt_number) in pairs {
        let sem = sem.clone();
        let ctx = ctx.clone();
        let collected = collected.clone();
        set.spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let records = process_attempt(&ctx, &run, attempt_number).await;
            let mut collected = collected.lock().await;
            for record in records {
                if collected.seen_jobs.insert(record.job_id) {
                    collected.records.push(record);
                }
            }
        });
    }
    while let Some(join_result) = set.join_next().await {
        if let Err(e) = join_result {
            tracing::error!("Attempt task failed: {:?}", e);
        }
    }
    let collected = std::mem::take(&mut *collected.lock().await);
    collected.records
}

/// Deterministic final ordering and summary counts. Re-applies the
/// one-record-per-job invariant so it holds for the report no matter how the
/// records were produced.
pub fn finalize(mut records: Vec<FailureRecord>) -> (Vec<FailureRecord>, Summary) {
    let mut seen = HashSet::new();
    records.retain(|record| seen.insert(record.job_id));
    records.sort_by(|a, b| {
        a.workflow_name.cmp(&b.workflow_name).then(a.attempt_number.cmp(&b.attempt_number))
    });
    let attempts_with_failures =
        records.iter().map(|r| r.attempt_number).collect::<HashSet<_>>().len();
    let summary =
        Summary { attempts_with_failures, total_failed_jobs: records.len() };
    (records, summary)
}
