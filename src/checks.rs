//! Agent checks built on the scanner.
//!
//! The scanner only classifies; these checks turn an [`Aggregate`] into
//! metrics and service checks and decide severities. Output goes through a
//! [`MetricSink`] supplied by the host agent.

use crate::aggregate::{Aggregate, TerminalStatus};
use crate::config::{required, BoundaryKind, ScanConfig};
use crate::error::{ErrorCategory, Result};
use crate::scanner::{scan_file, MatchPolicy};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Health of a service check, in agent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Ok,
    Warning,
    Critical,
}

/// Destination for the values a check produces.
pub trait MetricSink {
    /// Report the current value of a gauge.
    fn gauge(&mut self, name: &str, value: f64, tags: &[String]);
    /// Add `by` to a counter.
    fn increment(&mut self, name: &str, by: u64, tags: &[String]);
    /// Report the status of a named service check.
    fn service_check(&mut self, name: &str, status: ServiceStatus, message: Option<&str>);
}

/// A check instance block: scan settings plus the tags to attach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckInstance {
    #[serde(flatten)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CheckInstance {
    pub fn new(scan: ScanConfig) -> Self {
        CheckInstance {
            scan,
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Decode an instance from JSON.
    ///
    /// # Errors
    ///
    /// Returns a config-category error if the document cannot be decoded.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Reports the most recent OOM kill since the last boot.
///
/// Emits `system.oom.count` (kills since boot) and the `system.oom` service
/// check: OK without kills, CRITICAL with the latest kill's details. A missing
/// log is a WARNING; any other failure is CRITICAL.
#[derive(Debug, Clone)]
pub struct OomCheck {
    instance: CheckInstance,
    last_status: Option<ServiceStatus>,
}

impl OomCheck {
    pub const SERVICE_CHECK: &'static str = "system.oom";
    pub const COUNT_METRIC: &'static str = "system.oom.count";

    /// Kill messages are matched case-insensitively and only the latest is kept.
    pub fn new(instance: CheckInstance) -> Self {
        let mut instance = instance;
        instance.scan.match_policy = MatchPolicy::LatestMatch;
        instance.scan.message_regex_case_insensitive = true;
        OomCheck {
            instance,
            last_status: None,
        }
    }

    /// Status reported by the previous run, if any.
    pub fn last_status(&self) -> Option<ServiceStatus> {
        self.last_status
    }

    /// Run the check. A missing kill pattern is a config failure: without it
    /// every kernel line would count as a kill.
    pub fn check(&mut self, sink: &mut dyn MetricSink) -> ServiceStatus {
        let pattern = required("kill_message_regex", self.instance.scan.message_regex.as_deref());
        let aggregate = match pattern {
            Ok(_) => scan_file(&self.instance.scan),
            Err(err) => {
                warn!("{}: not scanning: {err}", Self::SERVICE_CHECK);
                Aggregate::aborted(&err)
            }
        };
        let tags = &self.instance.tags;

        let (status, message) = match aggregate.failure() {
            Some(failure) => {
                let status = match failure.category {
                    ErrorCategory::NotFound => ServiceStatus::Warning,
                    _ => ServiceStatus::Critical,
                };
                (status, Some(failure.message.clone()))
            }
            None => {
                sink.gauge(Self::COUNT_METRIC, aggregate.qualifying() as f64, tags);
                match aggregate.latest() {
                    None => (ServiceStatus::Ok, None),
                    Some(latest) => {
                        let details = serde_json::to_string(&latest.captures)
                            .unwrap_or_else(|_| latest.line.clone());
                        (
                            ServiceStatus::Critical,
                            Some(format!("Process OOM killed since last boot: {details}")),
                        )
                    }
                }
            }
        };

        sink.service_check(Self::SERVICE_CHECK, status, message.as_deref());
        self.observe(status);
        status
    }

    fn observe(&mut self, status: ServiceStatus) {
        if let Some(previous) = self.last_status.replace(status) {
            if previous != status {
                info!("{}: {previous:?} -> {status:?}", Self::SERVICE_CHECK);
            }
        }
    }
}

/// Counts segfaults per process inside a time window.
///
/// Emits one `system.segfault.count` gauge per process, tagged with
/// `time_window:<seconds>` and `process:<name>` (left out when no name was
/// extracted). Problems increment `system.segfault.errors` tagged
/// `type:config`, `type:io` or `type:parse`.
#[derive(Debug, Clone)]
pub struct SegfaultCheck {
    instance: CheckInstance,
}

impl SegfaultCheck {
    pub const COUNT_METRIC: &'static str = "system.segfault.count";
    pub const ERROR_METRIC: &'static str = "system.segfault.errors";

    /// The scan always uses a wall-clock window and counts every event.
    pub fn new(instance: CheckInstance) -> Self {
        let mut instance = instance;
        instance.scan.boundary = Some(BoundaryKind::WallClockWindow);
        instance.scan.match_policy = MatchPolicy::CountAll;
        SegfaultCheck { instance }
    }

    /// Run the check and return the aggregate it reported from.
    pub fn check(&self, sink: &mut dyn MetricSink) -> Aggregate {
        let aggregate = scan_file(&self.instance.scan);

        if let TerminalStatus::Aborted(failure) = aggregate.status() {
            let tags = self.tags([format!("type:{}", failure.category.as_str())]);
            sink.increment(Self::ERROR_METRIC, 1, &tags);
            return aggregate;
        }

        if aggregate.parse_errors() > 0 {
            let tags = self.tags([format!("type:{}", ErrorCategory::Parse.as_str())]);
            sink.increment(Self::ERROR_METRIC, aggregate.parse_errors(), &tags);
        }

        let window = self.instance.scan.window_seconds.unwrap_or_default();
        for (process, count) in aggregate.counts() {
            let mut extra = vec![format!("time_window:{window}")];
            if !process.is_empty() {
                extra.push(format!("process:{process}"));
            }
            sink.gauge(Self::COUNT_METRIC, *count as f64, &self.tags(extra));
        }

        aggregate
    }

    fn tags(&self, extra: impl IntoIterator<Item = String>) -> Vec<String> {
        self.instance.tags.iter().cloned().chain(extra).collect()
    }
}
