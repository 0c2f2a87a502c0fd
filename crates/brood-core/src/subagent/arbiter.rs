//! Result arbiter: streamed terminal result vs. the raw last stdout line.
//!
//! Both normally agree. When they don't, the last line is often a trailing
//! section header or a one-word sign-off that a long streamed report should
//! win over.

use std::sync::LazyLock;

use regex::Regex;

/// Streamed reports at least this long count as substantive.
pub const MIN_SUBSTANTIVE_STREAMED_LEN: usize = 500;
/// Fallback text at most this long counts as terse.
pub const MAX_TERSE_FALLBACK_LEN: usize = 40;
/// Longest single line still considered a possible header.
const MAX_HEADER_LEN: usize = 120;

static PHASE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(#{1,6}\s+|(phase|step|stage|part|section)\s+\d+\b)")
        .expect("phase header pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    Streamed,
    Fallback,
}

impl ReportSource {
    /// The text this source refers to.
    pub fn pick<'a>(self, streamed: &'a str, fallback: &'a str) -> &'a str {
        match self {
            Self::Streamed => streamed,
            Self::Fallback => fallback,
        }
    }
}

/// Decide which report to return. Lengths are measured in characters after
/// trimming.
pub fn choose_report(streamed: &str, fallback: &str) -> ReportSource {
    let fallback = fallback.trim();
    if fallback.is_empty() || is_phase_header(fallback) {
        return ReportSource::Streamed;
    }

    let streamed_len = streamed.trim().chars().count();
    let fallback_len = fallback.chars().count();
    if streamed_len >= MIN_SUBSTANTIVE_STREAMED_LEN && fallback_len <= MAX_TERSE_FALLBACK_LEN {
        return ReportSource::Streamed;
    }

    ReportSource::Fallback
}

/// Whether `text` looks like a section or phase header rather than prose.
pub fn is_phase_header(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.contains('\n') || text.chars().count() > MAX_HEADER_LEN {
        return false;
    }
    PHASE_HEADER.is_match(text) || text.ends_with(':')
}
