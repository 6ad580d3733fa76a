use crate::error::{ErrorCategory, ScanError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Reached a line older than the wall-clock window.
    CompletedByWindow,
    /// Reached a line from before the last reboot.
    CompletedByBoundary,
    /// Read the whole file.
    CompletedByEof,
    /// Examined the configured maximum number of lines.
    CompletedByLimit,
    /// The scan could not run or could not finish.
    Aborted(ScanFailure),
}

impl TerminalStatus {
    pub fn is_aborted(&self) -> bool {
        matches!(self, TerminalStatus::Aborted(_))
    }
}

/// Category and description of an aborted scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&ScanError> for ScanFailure {
    fn from(err: &ScanError) -> Self {
        ScanFailure {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// The most recent qualifying event of a latest-match scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestMatch {
    /// Named groups of the message pattern, or of the line pattern when no
    /// message pattern is configured. Groups that did not participate are absent.
    pub captures: BTreeMap<String, String>,
    /// Aggregation key of the event (empty when none was extracted).
    pub key: String,
    /// The full log line.
    pub line: String,
    /// Position of the line counted from the end of the file (0 = last line).
    pub line_index: u64,
}

/// Result of one scan.
///
/// In count-all mode `counts` holds one entry per aggregation key. In
/// latest-match mode it holds at most one entry (the key of
/// [`latest`](Self::latest), with a count of 1); [`qualifying`](Self::qualifying)
/// still reports how many events were seen before the scan ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    counts: BTreeMap<String, u64>,
    latest: Option<LatestMatch>,
    qualifying: u64,
    parse_errors: u64,
    lines_examined: u64,
    status: TerminalStatus,
}

impl Aggregate {
    pub(crate) fn aborted(err: &ScanError) -> Self {
        Tally::default().finish(TerminalStatus::Aborted(ScanFailure::from(err)))
    }

    /// Count per aggregation key. The empty key collects events without one.
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    /// Count for a single key, `0` if it never occurred.
    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn latest(&self) -> Option<&LatestMatch> {
        self.latest.as_ref()
    }

    /// Number of qualifying events seen before the scan ended.
    pub fn qualifying(&self) -> u64 {
        self.qualifying
    }

    /// Number of lines skipped because a field could not be parsed.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    pub fn lines_examined(&self) -> u64 {
        self.lines_examined
    }

    pub fn status(&self) -> &TerminalStatus {
        &self.status
    }

    /// Returns the failure if the scan was aborted.
    pub fn failure(&self) -> Option<&ScanFailure> {
        match &self.status {
            TerminalStatus::Aborted(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Mutable counters of a scan in progress.
///
/// [`finish`](Self::finish) consumes the tally, so nothing can be counted once
/// a terminal status has been assigned.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    counts: BTreeMap<String, u64>,
    latest: Option<LatestMatch>,
    qualifying: u64,
    parse_errors: u64,
    lines_examined: u64,
}

impl Tally {
    pub(crate) fn lines_examined(&self) -> u64 {
        self.lines_examined
    }

    pub(crate) fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    pub(crate) fn examine_line(&mut self) {
        self.lines_examined += 1;
    }

    pub(crate) fn parse_error(&mut self) {
        self.parse_errors += 1;
    }

    pub(crate) fn has_latest(&self) -> bool {
        self.latest.is_some()
    }

    pub(crate) fn count(&mut self, key: &str) {
        self.qualifying += 1;
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Record `latest` unless an earlier-seen (chronologically later) match exists.
    pub(crate) fn keep_latest(&mut self, latest: Option<LatestMatch>) {
        self.qualifying += 1;
        if self.latest.is_some() {
            return;
        }
        if let Some(latest) = latest {
            self.counts.insert(latest.key.clone(), 1);
            self.latest = Some(latest);
        }
    }

    pub(crate) fn finish(self, status: TerminalStatus) -> Aggregate {
        Aggregate {
            counts: self.counts,
            latest: self.latest,
            qualifying: self.qualifying,
            parse_errors: self.parse_errors,
            lines_examined: self.lines_examined,
            status,
        }
    }
}
