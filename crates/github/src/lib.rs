//! GitHub-facing half of ci-digest: the REST client, run/attempt discovery,
//! per-attempt job processing, and the failure aggregation that feeds the
//! report.
//!
//! All network I/O lives here. The extraction algorithm and the data model
//! are in `ci-digest-core`; rendering is the CLI's problem.

pub mod aggregate;
pub mod attempts;
pub mod client;
pub mod discovery;

use std::sync::Arc;

use ci_digest_core::signal::MatchConfig;

pub use crate::{
    aggregate::{MAX_POOL, Summary, collect_failures, finalize},
    client::{ApiResponse, Client},
    discovery::{Discovery, discover_runs},
};

/// Shared context cloned into every fan-out task: the client, the target
/// repository, and the match configuration. Nothing in here is mutable.
#[derive(Clone)]
pub struct DigestContext {
    pub client: Client,
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub match_config: Arc<MatchConfig>,
}
