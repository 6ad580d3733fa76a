//! Windowed reverse scanning of a log file.
//!
//! A [`Scanner`] walks a log from its last line backward. Each line goes
//! through two anchored patterns: the line pattern splits it into a `message`
//! and a temporal field (`uptime` or `timestamp`), and the optional message
//! pattern decides whether the message is an event worth recording. Before
//! the message is looked at, the [`BoundaryPolicy`] may end the scan: a
//! reboot detected through a rising uptime, or a timestamp that has fallen
//! out of the window. The [`MatchPolicy`] decides what is recorded.
//!
//! A scanner holds only compiled configuration; every scan builds its own
//! window, reader and counters, so one scanner can serve any number of scans,
//! including concurrent ones.

use crate::aggregate::{Aggregate, LatestMatch, ScanFailure, Tally, TerminalStatus};
use crate::config::{required, BoundaryKind, ScanConfig};
use crate::error::{ParseError, Result, ScanError};
use crate::reverse::{RawLine, ReverseLineReader};
use crate::timestamp;
use chrono::{Local, NaiveDateTime, TimeDelta};
use log::{debug, warn};
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

const MESSAGE: &str = "message";
const UPTIME: &str = "uptime";
const TIMESTAMP: &str = "timestamp";

/// What to record for qualifying events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Keep only the most recent event (the first one met scanning backward).
    LatestMatch,
    /// Count every event per aggregation key.
    #[default]
    CountAll,
}

/// When a backward scan stops before reaching the start of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Stop when a line's uptime exceeds that of the line examined just before
    /// it (i.e. the next line in file order): the system rebooted in between.
    MonotonicReset,
    /// Stop at the first line whose resolved timestamp is older than
    /// `now - window`.
    WallClockWindow {
        timestamp_format: String,
        window: TimeDelta,
    },
    /// Scan to the start of the file.
    Unbounded,
}

/// The reference frame of a single scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWindow {
    now: NaiveDateTime,
    boundary: BoundaryPolicy,
    oldest: Option<NaiveDateTime>,
}

impl ScanWindow {
    /// Fix the boundary relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns a config error if `now - window` is not a representable instant.
    pub fn new(now: NaiveDateTime, boundary: BoundaryPolicy) -> Result<Self> {
        let oldest = match &boundary {
            BoundaryPolicy::WallClockWindow { window, .. } => Some(
                now.checked_sub_signed(*window)
                    .ok_or_else(|| ScanError::config("time_window_seconds", "is out of range"))?,
            ),
            _ => None,
        };
        Ok(ScanWindow {
            now,
            boundary,
            oldest,
        })
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn boundary(&self) -> &BoundaryPolicy {
        &self.boundary
    }

    /// Maximum event age, for wall-clock windows.
    pub fn max_age(&self) -> Option<TimeDelta> {
        match &self.boundary {
            BoundaryPolicy::WallClockWindow { window, .. } => Some(*window),
            _ => None,
        }
    }

    /// Oldest instant still inside the window, for wall-clock windows.
    pub fn oldest(&self) -> Option<NaiveDateTime> {
        self.oldest
    }
}

/// Temporal field of a matched line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Temporal<'a> {
    /// Seconds since boot.
    Uptime(f64),
    /// Unresolved timestamp text.
    Timestamp(&'a str),
    /// The boundary needs no temporal field.
    None,
}

/// The parts of a line matched by the line pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedLineEvent<'a> {
    pub message: &'a str,
    pub temporal: Temporal<'a>,
}

impl<'a> ParsedLineEvent<'a> {
    /// Extract the message and the temporal field `boundary` relies on.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if a needed group did not participate or the
    /// uptime is not a number.
    pub fn from_captures(
        captures: &Captures<'a>,
        boundary: &BoundaryPolicy,
    ) -> std::result::Result<Self, ParseError> {
        let message = capture(captures, MESSAGE)?;
        let temporal = match boundary {
            BoundaryPolicy::MonotonicReset => {
                let value = capture(captures, UPTIME)?;
                let uptime = value.trim().parse().map_err(|source| ParseError::Uptime {
                    value: value.to_string(),
                    source,
                })?;
                Temporal::Uptime(uptime)
            }
            BoundaryPolicy::WallClockWindow { .. } => {
                Temporal::Timestamp(capture(captures, TIMESTAMP)?)
            }
            BoundaryPolicy::Unbounded => Temporal::None,
        };
        Ok(ParsedLineEvent { message, temporal })
    }
}

fn capture<'a>(
    captures: &Captures<'a>,
    name: &'static str,
) -> std::result::Result<&'a str, ParseError> {
    captures
        .name(name)
        .map(|m| m.as_str())
        .ok_or(ParseError::MissingCapture(name))
}

/// Match `pattern` at the start of `haystack` only.
fn captures_at_start<'h>(pattern: &Regex, haystack: &'h str) -> Option<Captures<'h>> {
    pattern
        .captures(haystack)
        .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
}

fn named_captures(pattern: &Regex, captures: &Captures<'_>) -> BTreeMap<String, String> {
    pattern
        .capture_names()
        .flatten()
        .filter_map(|name| {
            captures
                .name(name)
                .map(|m| (name.to_string(), m.as_str().to_string()))
        })
        .collect()
}

/// Boundary state of one scan in progress.
enum BoundaryTracker<'w> {
    MonotonicReset { last_uptime: Option<f64> },
    WallClockWindow {
        format: &'w str,
        now: NaiveDateTime,
        oldest: NaiveDateTime,
    },
    Unbounded,
}

impl<'w> BoundaryTracker<'w> {
    fn new(window: &'w ScanWindow) -> Self {
        match (&window.boundary, window.oldest) {
            (BoundaryPolicy::MonotonicReset, _) => {
                BoundaryTracker::MonotonicReset { last_uptime: None }
            }
            (BoundaryPolicy::WallClockWindow { timestamp_format, .. }, Some(oldest)) => {
                BoundaryTracker::WallClockWindow {
                    format: timestamp_format,
                    now: window.now,
                    oldest,
                }
            }
            // A wall-clock window always has a cutoff once built by `ScanWindow::new`.
            _ => BoundaryTracker::Unbounded,
        }
    }

    /// Returns the terminal status if `event` lies beyond the boundary.
    fn crossed(
        &mut self,
        event: &ParsedLineEvent<'_>,
    ) -> std::result::Result<Option<TerminalStatus>, ParseError> {
        match (self, event.temporal) {
            (BoundaryTracker::MonotonicReset { last_uptime }, Temporal::Uptime(uptime)) => {
                // Equal uptimes do not count as a reset.
                if last_uptime.is_some_and(|last| uptime > last) {
                    return Ok(Some(TerminalStatus::CompletedByBoundary));
                }
                *last_uptime = Some(uptime);
                Ok(None)
            }
            (
                BoundaryTracker::WallClockWindow { format, now, oldest },
                Temporal::Timestamp(text),
            ) => {
                let resolved = timestamp::resolve(text, format, *now)?;
                if resolved.instant < *oldest {
                    return Ok(Some(TerminalStatus::CompletedByWindow));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

enum Step<'h> {
    Skip,
    Stop(TerminalStatus),
    Event(Captures<'h>, Option<Captures<'h>>),
}

/// A compiled, validated scan configuration.
///
/// # Examples
///
/// ```no_run
/// use kernscan::{MatchPolicy, ScanConfig, Scanner};
///
/// let config = ScanConfig::new(
///     "/var/log/kern.log",
///     r"^(?P<timestamp>.+?) (?P<host>\S+) kernel: \[\s*(?P<uptime>\d+(?:\.\d+)?)\] (?P<message>.*)$",
/// )
/// .with_message_regex(r"^Out of memory: Kill process (?P<pid>\d+) \((?P<process>.*?)\)")
/// .with_match_policy(MatchPolicy::LatestMatch);
///
/// let scanner = Scanner::new(&config)?;
/// let aggregate = scanner.scan();
/// if let Some(latest) = aggregate.latest() {
///     println!("last OOM kill since boot: {:?}", latest.captures);
/// }
/// # Ok::<(), kernscan::ScanError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Scanner {
    log_path: PathBuf,
    line_pattern: Regex,
    message_pattern: Option<Regex>,
    key_capture: String,
    boundary: BoundaryPolicy,
    match_policy: MatchPolicy,
    buffer_size: usize,
    max_lines: Option<u64>,
    now: Option<NaiveDateTime>,
}

impl Scanner {
    /// Validate `config` and compile its patterns. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns a config-category [`ScanError`] if a required setting is
    /// missing, a pattern does not compile, the line pattern lacks a group
    /// the boundary needs, the buffer size is zero, or the window reaches back
    /// past the earliest representable instant.
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let log_path = required("logfile", config.log_path.as_deref())?.to_path_buf();

        let line_pattern = Regex::new(required("kernel_line_regex", config.line_regex.as_deref())?)
            .map_err(|source| ScanError::InvalidRegex {
                field: "kernel_line_regex",
                source,
            })?;
        let has_group = |name: &str| line_pattern.capture_names().flatten().any(|n| n == name);
        if !has_group(MESSAGE) {
            return Err(ScanError::config(
                "kernel_line_regex",
                "must have a `message` capture group",
            ));
        }

        let message_pattern = match &config.message_regex {
            Some(pattern) => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(config.message_regex_case_insensitive)
                    .build()
                    .map_err(|source| ScanError::InvalidRegex {
                        field: "message_regex",
                        source,
                    })?,
            ),
            None => None,
        };

        let boundary = match config.effective_boundary(has_group(UPTIME)) {
            BoundaryKind::MonotonicReset => {
                if !has_group(UPTIME) {
                    return Err(ScanError::config(
                        "kernel_line_regex",
                        "must have an `uptime` capture group to detect reboots",
                    ));
                }
                BoundaryPolicy::MonotonicReset
            }
            BoundaryKind::WallClockWindow => {
                if !has_group(TIMESTAMP) {
                    return Err(ScanError::config(
                        "kernel_line_regex",
                        "must have a `timestamp` capture group for a time window",
                    ));
                }
                let format = required("timestamp_format", config.timestamp_format.as_deref())?;
                let seconds = *required("time_window_seconds", config.window_seconds.as_ref())?;
                let window = i64::try_from(seconds)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .ok_or_else(|| ScanError::config("time_window_seconds", "is out of range"))?;
                BoundaryPolicy::WallClockWindow {
                    timestamp_format: format.to_string(),
                    window,
                }
            }
            BoundaryKind::Unbounded => BoundaryPolicy::Unbounded,
        };

        if config.buffer_size == 0 {
            return Err(ScanError::config("buffer_size", "must be greater than zero"));
        }

        // Reject windows reaching past the representable range up front.
        ScanWindow::new(config.now.unwrap_or_else(local_now), boundary.clone())?;

        Ok(Scanner {
            log_path,
            line_pattern,
            message_pattern,
            key_capture: config.key_capture.clone(),
            boundary,
            match_policy: config.match_policy,
            buffer_size: config.buffer_size,
            max_lines: config.max_lines,
            now: config.now,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn boundary(&self) -> &BoundaryPolicy {
        &self.boundary
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.match_policy
    }

    /// The window a scan starting now would use: the configured reference
    /// instant, or the current local time.
    ///
    /// # Errors
    ///
    /// See [`ScanWindow::new`].
    pub fn window(&self) -> Result<ScanWindow> {
        self.window_at(self.now.unwrap_or_else(local_now))
    }

    pub fn window_at(&self, now: NaiveDateTime) -> Result<ScanWindow> {
        ScanWindow::new(now, self.boundary.clone())
    }

    /// Scan the log file. Failures are reported in the returned aggregate.
    pub fn scan(&self) -> Aggregate {
        self.scan_window(self.window())
    }

    /// Scan the log file with an explicit reference instant.
    pub fn scan_at(&self, now: NaiveDateTime) -> Aggregate {
        self.scan_window(self.window_at(now))
    }

    fn scan_window(&self, window: Result<ScanWindow>) -> Aggregate {
        let window = match window {
            Ok(window) => window,
            Err(err) => return self.abort(err),
        };
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(source) => return self.abort(ScanError::from_io(&self.log_path, source)),
        };
        self.scan_reader(file, &window)
    }

    /// Scan an already open stream. The stream is dropped when the scan ends;
    /// pass `&mut` to keep it.
    pub fn scan_reader<R: Read + Seek>(&self, reader: R, window: &ScanWindow) -> Aggregate {
        let lines = match ReverseLineReader::with_buffer_size(reader, self.buffer_size) {
            Ok(lines) => lines,
            Err(source) => return self.abort(ScanError::from_io(&self.log_path, source)),
        };
        debug!(
            "scanning {} backward ({} bytes, now {}, {:?})",
            self.log_path.display(),
            lines.stream_len(),
            window.now,
            window.boundary
        );

        let mut tally = Tally::default();
        let status = self.run(lines, window, &mut tally);

        if tally.parse_errors() > 0 {
            warn!(
                "{}: skipped {} unparsable line(s)",
                self.log_path.display(),
                tally.parse_errors()
            );
        }
        if let TerminalStatus::Aborted(failure) = &status {
            warn!("scan of {} aborted: {}", self.log_path.display(), failure.message);
        }
        let aggregate = tally.finish(status);
        debug!(
            "scan of {} ended: {:?} after {} line(s), {} event(s)",
            self.log_path.display(),
            aggregate.status(),
            aggregate.lines_examined(),
            aggregate.qualifying()
        );
        aggregate
    }

    fn run<R: Read + Seek>(
        &self,
        lines: ReverseLineReader<R>,
        window: &ScanWindow,
        tally: &mut Tally,
    ) -> TerminalStatus {
        let mut boundary = BoundaryTracker::new(window);

        for line in lines {
            let line = match line {
                Ok(line) => line,
                Err(source) => {
                    let err = ScanError::from_io(&self.log_path, source);
                    return TerminalStatus::Aborted(ScanFailure::from(&err));
                }
            };

            if self.max_lines.is_some_and(|max| tally.lines_examined() >= max) {
                return TerminalStatus::CompletedByLimit;
            }
            tally.examine_line();

            match self.step(&line, &mut boundary) {
                Ok(Step::Skip) => {}
                Ok(Step::Stop(status)) => return status,
                Ok(Step::Event(line_caps, message_caps)) => {
                    self.record(tally, &line, &line_caps, message_caps.as_ref());
                }
                Err(err) => {
                    debug!("{}: line {} skipped: {err}", self.log_path.display(), line.index);
                    tally.parse_error();
                }
            }
        }

        TerminalStatus::CompletedByEof
    }

    fn step<'h>(
        &self,
        line: &'h RawLine,
        boundary: &mut BoundaryTracker<'_>,
    ) -> std::result::Result<Step<'h>, ParseError> {
        let Some(line_caps) = captures_at_start(&self.line_pattern, &line.text) else {
            return Ok(Step::Skip);
        };

        let event = ParsedLineEvent::from_captures(&line_caps, &self.boundary)?;
        if let Some(status) = boundary.crossed(&event)? {
            return Ok(Step::Stop(status));
        }

        let message_caps = match &self.message_pattern {
            Some(pattern) => match captures_at_start(pattern, event.message) {
                Some(caps) => Some(caps),
                None => return Ok(Step::Skip),
            },
            None => None,
        };

        Ok(Step::Event(line_caps, message_caps))
    }

    fn record(
        &self,
        tally: &mut Tally,
        line: &RawLine,
        line_caps: &Captures<'_>,
        message_caps: Option<&Captures<'_>>,
    ) {
        let key = message_caps
            .and_then(|caps| caps.name(&self.key_capture))
            .map_or("", |m| m.as_str());

        match self.match_policy {
            MatchPolicy::CountAll => tally.count(key),
            MatchPolicy::LatestMatch => {
                let latest = (!tally.has_latest()).then(|| {
                    let captures = match (message_caps, &self.message_pattern) {
                        (Some(caps), Some(pattern)) => named_captures(pattern, caps),
                        _ => named_captures(&self.line_pattern, line_caps),
                    };
                    LatestMatch {
                        captures,
                        key: key.to_string(),
                        line: line.text.clone(),
                        line_index: line.index,
                    }
                });
                tally.keep_latest(latest);
            }
        }
    }

    fn abort(&self, err: ScanError) -> Aggregate {
        warn!("scan of {} aborted: {err}", self.log_path.display());
        Aggregate::aborted(&err)
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Compile `config` and scan its log file.
///
/// Unlike [`Scanner::new`] this never fails: configuration errors come back
/// as an aborted aggregate, before any file is touched.
pub fn scan_file(config: &ScanConfig) -> Aggregate {
    match Scanner::new(config) {
        Ok(scanner) => scanner.scan(),
        Err(err) => {
            warn!("not scanning: {err}");
            Aggregate::aborted(&err)
        }
    }
}
