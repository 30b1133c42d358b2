//! Extracts "signal" lines from raw CI job logs.
//!
//! CI logs repeat the same failure many times with varying timestamps,
//! commit SHAs, process ids and line numbers. Matching lines are deduplicated
//! on a normalized form that erases that variable content, so a log that
//! prints one error fifty times contributes one line of evidence.

use std::{borrow::Cow, collections::HashSet, sync::OnceLock};

use regex::Regex;

/// Maximum number of signal lines kept per job log.
pub const MAX_SIGNAL_LINES: usize = 10;

/// Include/exclude substring lists used to decide which log lines are
/// failure evidence. Matching is plain substring containment, not regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            includes: [
                "FAIL",
                "Fail",
                "failed",
                "ERROR:",
                "error:",
                "##[error]",
                "Error Trace:",
            ]
            .map(str::to_string)
            .to_vec(),
            excludes: [
                "Failed to restore cache",
                "Failed to save cache",
                "Unable to reserve cache",
            ]
            .map(str::to_string)
            .to_vec(),
        }
    }
}

fn ansi_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap())
}

/// Remove ANSI escape sequences (color codes and cursor movement).
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ansi_regex().replace_all(line, "")
}

/// Substitution rules that erase variable content, applied in order.
fn rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            // ISO-8601 timestamps with fractional seconds
            (r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+(?:Z|[+-]\d{2}:\d{2})?", ""),
            // CI step indicator prefixes: `#7 12.34 `
            (r"^(?:#\d+ \d+\.\d+ )+", ""),
            // Bracketed process/timestamp error tags: `[123:456/789.012:ERROR:...]`
            (r"\[\d+:\d+/\d+\.\d+:ERROR:[^\]]*\]", ""),
            // Bracketed WebGL hex identifiers
            (r"\[\.[A-Za-z]+-0x[0-9a-fA-F]+\]", ""),
            // Bracketed date-time stamps
            (r"\[\d{4}[-/]\d{2}[-/]\d{2}[ T]\d{2}:\d{2}:\d{2}[^\]]*\]", ""),
            // Bare date-time stamps
            (r"\d{4}[-/]\d{2}[-/]\d{2}[ T]\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?", ""),
            // Bare clock times
            (r"\b\d{2}:\d{2}:\d{2}(?:\.\d+)?\b", ""),
            // Leading execution-time prefixes: `0.123s `
            (r"^(?:\d+\.\d+s? +)+", ""),
            // Source line numbers
            (r"\bline \d+\b", "line"),
            (r"(?::\d+)+:", ":"),
            // Commit SHAs, object ids, and other hex runs
            (r"\b[0-9a-fA-F]{7,40}\b", "ID"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
        .collect()
    })
}

fn normalize_once(line: &str) -> String {
    let mut out = line.to_string();
    for (regex, replacement) in rules() {
        if let Cow::Owned(replaced) = regex.replace_all(&out, *replacement) {
            out = replaced;
        }
    }
    out.trim().to_string()
}

/// Normalized form of a log line, used only for dedup decisions. Applied to
/// a fixpoint: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(line: &str) -> String {
    let mut out = normalize_once(line);
    loop {
        let next = normalize_once(&out);
        if next == out {
            return out;
        }
        out = next;
    }
}

/// Extract up to [`MAX_SIGNAL_LINES`] failure lines from a raw job log, in
/// chronological order. The log is scanned in reverse so the most recent
/// distinct signals win in very long logs.
pub fn extract_failure_lines(log: &str, config: &MatchConfig) -> Vec<String> {
    let mut kept = Vec::new();
    let mut seen = HashSet::new();
    for raw in log.lines().rev() {
        let line = strip_ansi(raw);
        let line = line.trim();
        if !config.includes.iter().any(|p| line.contains(p.as_str())) {
            continue;
        }
        if config.excludes.iter().any(|p| line.contains(p.as_str())) {
            continue;
        }
        let normalized = normalize(line);
        if normalized.is_empty() || !seen.insert(normalized) {
            continue;
        }
        kept.push(line.to_string());
        if kept.len() == MAX_SIGNAL_LINES {
            break;
        }
    }
    kept.reverse();
    kept
}
