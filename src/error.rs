//! Error types for scanning.
//!
//! Two layers: [`ScanError`] aborts a whole scan (bad configuration, the log
//! cannot be opened or read), while [`ParseError`] only ever affects a single
//! line and is tallied instead of propagated.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Result type alias for operations that can abort a scan.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Coarse classification of a failure, for callers that map failures onto
/// health-check severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid or incomplete scan configuration.
    Config,
    /// The log file does not exist (often expected: rotated away, service not started).
    NotFound,
    /// Any other I/O failure: permission denied, read or seek errors.
    Io,
    /// A single line could not be interpreted.
    Parse,
}

impl ErrorCategory {
    /// Short lowercase name, as used in metric tags (`type:<name>`).
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::NotFound | ErrorCategory::Io => "io",
            ErrorCategory::Parse => "parse",
        }
    }
}

/// Errors that abort a scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A configuration field is missing or has an unusable value.
    #[error("invalid config: `{field}` {reason}")]
    Config { field: &'static str, reason: String },

    /// A configured pattern does not compile.
    #[error("invalid config: `{field}` is not a valid pattern: {source}")]
    InvalidRegex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    /// The configuration document itself could not be decoded.
    #[error("invalid config: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The log file does not exist.
    #[error("{}: {source}", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Opening, seeking or reading the log file failed.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        ScanError::Config {
            field,
            reason: reason.into(),
        }
    }

    /// Classify an I/O error on `path`, keeping "not found" distinct.
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.kind() == io::ErrorKind::NotFound {
            ScanError::NotFound { path, source }
        } else {
            ScanError::Io { path, source }
        }
    }

    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScanError::Config { .. } | ScanError::InvalidRegex { .. } | ScanError::Malformed(_) => {
                ErrorCategory::Config
            }
            ScanError::NotFound { .. } => ErrorCategory::NotFound,
            ScanError::Io { .. } => ErrorCategory::Io,
        }
    }
}

/// Why a single line was skipped.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The line pattern matched, but a group the scan needs did not participate.
    #[error("line has no `{0}` capture")]
    MissingCapture(&'static str),

    /// The `uptime` capture is not a number.
    #[error("uptime {value:?} is not a number: {source}")]
    Uptime {
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    /// The timestamp does not match the configured format.
    #[error("timestamp {timestamp:?} does not match format {format:?}: {source}")]
    Timestamp {
        timestamp: String,
        format: String,
        #[source]
        source: chrono::format::ParseError,
    },

    /// The timestamp parsed, but is not a real date in either candidate year
    /// (e.g. `Feb 29` when neither year is a leap year).
    #[error("timestamp {timestamp:?} is not a valid date in {last_year} or {this_year}")]
    NoValidYear {
        timestamp: String,
        this_year: i32,
        last_year: i32,
    },
}
