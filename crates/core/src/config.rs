use std::{fmt, str::FromStr};

use anyhow::{Context, Result, bail};
use percent_encoding::percent_decode_str;

use crate::signal::MatchConfig;

pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const REPOSITORY_ENV: &str = "REPOSITORY";
pub const MAX_ATTEMPTS_ENV: &str = "MAX_CI_ATTEMPTS";
pub const INCLUDE_PATTERNS_ENV: &str = "FAILURE_INCLUDE_PATTERNS";
pub const EXCLUDE_PATTERNS_ENV: &str = "FAILURE_EXCLUDE_PATTERNS";

/// A repository in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, name) = s
            .split_once('/')
            .with_context(|| format!("Invalid repository '{s}', expected owner/name"))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("Invalid repository '{s}', expected owner/name");
        }
        Ok(Self { owner: owner.to_string(), name: name.to_string() })
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Fully resolved invocation configuration. Built once at startup; nothing
/// reads the environment after this.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub repo: RepoSpec,
    pub pr_number: u64,
    /// Total CI attempt count for the summary line, if known.
    pub max_attempts: Option<u32>,
    pub match_config: MatchConfig,
}

impl Config {
    /// Resolve configuration from CLI arguments and the environment.
    /// Missing token and missing/malformed repository are fatal; an invalid
    /// `MAX_CI_ATTEMPTS` value is ignored.
    pub fn load(pr_number: u64, repo: Option<&str>, max_attempts: Option<u32>) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .with_context(|| format!("{TOKEN_ENV} is not set"))?;
        let repo = match repo {
            Some(value) => value.parse()?,
            None => std::env::var(REPOSITORY_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .with_context(|| {
                    format!("No repository given, pass --repo or set {REPOSITORY_ENV}")
                })?
                .parse()?,
        };
        let max_attempts = max_attempts
            .or_else(|| parse_max_attempts(std::env::var(MAX_ATTEMPTS_ENV).ok().as_deref()));
        let mut match_config = MatchConfig::default();
        if let Ok(raw) = std::env::var(INCLUDE_PATTERNS_ENV)
            && !raw.is_empty()
        {
            match_config.includes = parse_pattern_list(&raw);
        }
        if let Ok(raw) = std::env::var(EXCLUDE_PATTERNS_ENV)
            && !raw.is_empty()
        {
            match_config.excludes = parse_pattern_list(&raw);
        }
        Ok(Self { token, repo, pr_number, max_attempts, match_config })
    }
}

/// Best-effort parse of the attempt-count override; any invalid value maps
/// to `None` rather than an error.
pub fn parse_max_attempts(value: Option<&str>) -> Option<u32> {
    value?.trim().parse().ok()
}

/// Parse a comma-separated, percent-encoded pattern list. Encoding a comma
/// as `%2C` lets a pattern itself contain one.
pub fn parse_pattern_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| percent_decode_str(item.trim()).decode_utf8_lossy().into_owned())
        .filter(|item| !item.is_empty())
        .collect()
}
