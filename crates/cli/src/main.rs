mod report;

use std::sync::Arc;

use anyhow::Result;
use argp::FromArgs;
use ci_digest_core::{config::Config, models::PullRequestRef};
use ci_digest_github::{Client, DigestContext, collect_failures, discover_runs, finalize};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(FromArgs, Debug)]
/// Summarize CI failures for a pull request as a Markdown report on stdout.
struct Args {
    #[argp(positional)]
    /// pull request number
    pr_number: u64,
    #[argp(option)]
    /// repository in owner/name form (defaults to the REPOSITORY env var)
    repo: Option<String>,
    #[argp(option)]
    /// total CI attempt count for the summary line (defaults to MAX_CI_ATTEMPTS)
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level; logs go to stderr, the report to stdout
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .init();

    let args: Args = argp::parse_args_or_exit(argp::DEFAULT);
    if let Err(e) = run(args).await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.pr_number, args.repo.as_deref(), args.max_attempts)?;
    let pr = PullRequestRef {
        owner: config.repo.owner.clone(),
        repo: config.repo.name.clone(),
        number: config.pr_number,
    };

    let client = Client::new(&config.token)?;
    let discovery = discover_runs(&client, &pr).await?;
    tracing::info!(
        "Processing {} run attempts for {} PR #{}",
        discovery.pairs.len(),
        config.repo,
        pr.number
    );

    let ctx = DigestContext {
        client,
        owner: pr.owner.clone(),
        repo: pr.repo.clone(),
        base_branch: discovery.base_branch.clone(),
        match_config: Arc::new(config.match_config.clone()),
    };
    let records = collect_failures(&ctx, discovery.pairs).await;
    let (records, summary) = finalize(records);

    print!("{}", report::render(&pr, &records, &summary, config.max_attempts));
    Ok(())
}
