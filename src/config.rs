use crate::error::{Result, ScanError};
use crate::reverse::DEFAULT_BUFFER_SIZE;
use crate::scanner::MatchPolicy;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Capture group used as the aggregation key unless configured otherwise.
pub const DEFAULT_KEY_CAPTURE: &str = "process";

/// Which condition ends a scan early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// Stop at the first line whose `uptime` is larger than the line after it.
    MonotonicReset,
    /// Stop at the first line older than `time_window_seconds`.
    WallClockWindow,
    /// Never stop early.
    #[serde(alias = "none")]
    Unbounded,
}

/// Settings of one scan, as found in an agent instance block.
///
/// Every field is optional at the serialization level so that a missing
/// setting surfaces as a [`ScanError::Config`] naming the field, not as a
/// decode error. Field names follow the instance keys of the kernel log
/// checks (`logfile`, `kernel_line_regex`, ...).
///
/// # Examples
///
/// ```
/// use kernscan::{MatchPolicy, ScanConfig};
///
/// let config = ScanConfig::new("/var/log/kern.log", r"^(?P<timestamp>\w+ +\d+ [\d:]+) \S+ kernel: (?P<message>.*)$")
///     .with_message_regex(r"^(?P<process>[^\[]+)\[(?P<pid>\d+)\]: segfault")
///     .with_timestamp_format("%b %d %H:%M:%S")
///     .with_window_seconds(3600)
///     .with_match_policy(MatchPolicy::CountAll);
/// assert_eq!(config.window_seconds, Some(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Path of the log file.
    #[serde(rename = "logfile")]
    pub log_path: Option<PathBuf>,

    /// Pattern applied to every line. Must name a `message` group, plus
    /// `uptime` or `timestamp` depending on the boundary.
    #[serde(rename = "kernel_line_regex")]
    pub line_regex: Option<String>,

    /// Pattern applied to the `message` capture of matching lines.
    #[serde(alias = "kill_message_regex", alias = "process_name_regex")]
    pub message_regex: Option<String>,

    /// Compile `message_regex` case-insensitively.
    pub message_regex_case_insensitive: bool,

    /// Group of `message_regex` whose text becomes the aggregation key.
    pub key_capture: String,

    /// strftime-style format of the `timestamp` capture.
    pub timestamp_format: Option<String>,

    /// Maximum age, in seconds, of events counted by a wall-clock scan.
    #[serde(rename = "time_window_seconds")]
    pub window_seconds: Option<u64>,

    /// Early-termination rule. When absent it is inferred: a configured
    /// window selects [`BoundaryKind::WallClockWindow`], otherwise a line
    /// pattern with an `uptime` group selects [`BoundaryKind::MonotonicReset`],
    /// otherwise [`BoundaryKind::Unbounded`].
    pub boundary: Option<BoundaryKind>,

    pub match_policy: MatchPolicy,

    /// Bytes read per step when walking the file backward.
    pub buffer_size: usize,

    /// Stop after examining this many lines.
    pub max_lines: Option<u64>,

    /// Reference instant; the local wall-clock time at scan start when absent.
    #[serde(alias = "mock_now")]
    pub now: Option<NaiveDateTime>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            log_path: None,
            line_regex: None,
            message_regex: None,
            message_regex_case_insensitive: false,
            key_capture: DEFAULT_KEY_CAPTURE.to_string(),
            timestamp_format: None,
            window_seconds: None,
            boundary: None,
            match_policy: MatchPolicy::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_lines: None,
            now: None,
        }
    }
}

impl ScanConfig {
    /// Create a config with the two settings every scan needs.
    pub fn new(log_path: impl Into<PathBuf>, line_regex: impl Into<String>) -> Self {
        ScanConfig {
            log_path: Some(log_path.into()),
            line_regex: Some(line_regex.into()),
            ..ScanConfig::default()
        }
    }

    /// Decode a config from a JSON instance block.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Malformed`] if the document is not valid JSON or a
    /// field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_message_regex(mut self, pattern: impl Into<String>) -> Self {
        self.message_regex = Some(pattern.into());
        self
    }

    pub fn with_case_insensitive_messages(mut self) -> Self {
        self.message_regex_case_insensitive = true;
        self
    }

    pub fn with_key_capture(mut self, name: impl Into<String>) -> Self {
        self.key_capture = name.into();
        self
    }

    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    pub fn with_window_seconds(mut self, seconds: u64) -> Self {
        self.window_seconds = Some(seconds);
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryKind) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_max_lines(mut self, lines: u64) -> Self {
        self.max_lines = Some(lines);
        self
    }

    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    /// The boundary this config selects, explicit or inferred.
    ///
    /// `has_uptime_group` tells whether the compiled line pattern names an
    /// `uptime` group.
    pub fn effective_boundary(&self, has_uptime_group: bool) -> BoundaryKind {
        match self.boundary {
            Some(kind) => kind,
            None if self.window_seconds.is_some() => BoundaryKind::WallClockWindow,
            None if has_uptime_group => BoundaryKind::MonotonicReset,
            None => BoundaryKind::Unbounded,
        }
    }
}

/// Return the value of a required setting or a config error naming it.
pub(crate) fn required<'a, T: ?Sized>(field: &'static str, value: Option<&'a T>) -> Result<&'a T> {
    value.ok_or_else(|| ScanError::config(field, "is required"))
}
