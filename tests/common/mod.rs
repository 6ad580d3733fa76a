#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use kernscan::checks::{MetricSink, ServiceStatus};
use std::fs;
use std::path::{Path, PathBuf};

/// Kernel line with both a syslog timestamp and a bracketed uptime.
pub const KERNEL_LINE: &str =
    r"^(?P<timestamp>.+?) (?P<host>\S+) kernel: \[\s*(?P<uptime>\d+(?:\.\d+)?)\] (?P<message>.*)$";

/// Same shape as [`KERNEL_LINE`], but the uptime group has another name.
pub const KERNEL_LINE_NO_UPTIME: &str =
    r"^(?P<timestamp>.+?) (?P<host>\S+) kernel: \[\s*(?P<nope>\d+(?:\.\d+)?)\] (?P<message>.*)$";

pub const KILL_MESSAGE: &str =
    r"^Out of memory: Kill process (?P<pid>\d+) \((?P<pname>.*?)\) score (?P<score>.*?) or sacrifice child";

pub const SEGFAULT_MESSAGE: &str = r"^(?P<process>[^\[]+)\[(?P<pid>\d+)\]: segfault";

pub const SYSLOG_FORMAT: &str = "%b %d %H:%M:%S";

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

/// Reference instant the segfault fixtures lead up to.
pub fn segfault_now() -> NaiveDateTime {
    at(2018, 11, 29, 2, 12, 0)
}

/// Write `lines` (each followed by `\n`) to `dir/name`.
pub fn write_log(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut contents = String::new();
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }
    fs::write(&path, contents).unwrap();
    path
}

pub fn kernel_line(timestamp: &str, uptime: f64, message: &str) -> String {
    format!("{timestamp} web-01 kernel: [{uptime:>12.6}] {message}")
}

pub fn oom_kill(pid: u32, name: &str) -> String {
    format!("Out of memory: Kill process {pid} ({name}) score 905 or sacrifice child")
}

pub fn segfault(process: &str, pid: u32) -> String {
    format!("{process}[{pid}]: segfault at 0 ip 000055d5c2b4f1a2 sp 00007ffd3c1e8b40 error 4 in {process}[55d5c1a00000+1c3c000]")
}

/// Boot, a first OOM kill (pid 1404), noise, a second kill (pid 2093), noise.
pub fn killed_log() -> Vec<String> {
    vec![
        kernel_line("Nov 29 01:00:00", 0.0, "Linux version 4.15.0-39-generic"),
        kernel_line("Nov 29 01:00:00", 0.004, "Command line: BOOT_IMAGE=/boot/vmlinuz"),
        kernel_line("Nov 29 01:30:12", 1812.5, &oom_kill(1404, "java")),
        kernel_line("Nov 29 01:30:12", 1812.6, "Killed process 1404 (java) total-vm:8812344kB"),
        kernel_line("Nov 29 01:45:00", 2700.25, "eth0: link up"),
        kernel_line("Nov 29 02:05:33", 3933.1, &oom_kill(2093, "ruby")),
        kernel_line("Nov 29 02:05:33", 3933.2, "Killed process 2093 (ruby) total-vm:1212344kB"),
        kernel_line("Nov 29 02:10:00", 4200.0, "audit: backlog limit exceeded"),
    ]
}

/// Kills before a reboot, none after it.
pub fn rebooted_log() -> Vec<String> {
    vec![
        kernel_line("Nov 28 22:00:00", 0.0, "Linux version 4.15.0-39-generic"),
        kernel_line("Nov 28 23:10:00", 4200.0, &oom_kill(777, "postgres")),
        kernel_line("Nov 28 23:10:00", 4200.1, "Killed process 777 (postgres)"),
        kernel_line("Nov 29 01:00:00", 0.0, "Linux version 4.15.0-39-generic"),
        kernel_line("Nov 29 01:00:00", 0.004, "Command line: BOOT_IMAGE=/boot/vmlinuz"),
        kernel_line("Nov 29 01:45:00", 2700.25, "eth0: link up"),
    ]
}

pub fn clean_log() -> Vec<String> {
    vec![
        kernel_line("Nov 29 01:00:00", 0.0, "Linux version 4.15.0-39-generic"),
        kernel_line("Nov 29 01:00:00", 0.004, "Command line: BOOT_IMAGE=/boot/vmlinuz"),
        kernel_line("Nov 29 01:45:00", 2700.25, "eth0: link up"),
    ]
}

/// Four envoy segfaults: one within 65 seconds of [`segfault_now`], all four
/// within two hours.
pub fn envoy_segfaults_log() -> Vec<String> {
    vec![
        kernel_line("Nov 29 00:05:00", 100.0, "Linux version 4.15.0-39-generic"),
        kernel_line("Nov 29 00:12:40", 500.0, &segfault("envoy", 3011)),
        kernel_line("Nov 29 00:40:00", 2200.0, &segfault("envoy", 3311)),
        kernel_line("Nov 29 01:20:00", 4600.0, "eth0: link up"),
        kernel_line("Nov 29 01:58:20", 6900.0, &segfault("envoy", 4121)),
        kernel_line("Nov 29 02:11:05", 8265.0, &segfault("envoy", 5220)),
    ]
}

/// Three envoy and one anvoy segfault within two hours, plus an old one.
pub fn multi_segfaults_log() -> Vec<String> {
    vec![
        kernel_line("Nov 28 21:00:00", 10.0, &segfault("envoy", 1001)),
        kernel_line("Nov 29 00:12:40", 500.0, &segfault("envoy", 3011)),
        kernel_line("Nov 29 00:40:00", 2200.0, &segfault("anvoy", 3312)),
        kernel_line("Nov 29 01:58:20", 6900.0, &segfault("envoy", 4121)),
        kernel_line("Nov 29 02:11:05", 8265.0, &segfault("envoy", 5220)),
    ]
}

pub fn write_owned(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_log(dir, name, &lines)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Gauge {
        name: String,
        value: f64,
        tags: Vec<String>,
    },
    Increment {
        name: String,
        by: u64,
        tags: Vec<String>,
    },
    ServiceCheck {
        name: String,
        status: ServiceStatus,
        message: Option<String>,
    },
}

/// Sink that remembers everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub emitted: Vec<Emitted>,
}

impl RecordingSink {
    pub fn gauges(&self) -> Vec<(&str, f64, &[String])> {
        self.emitted
            .iter()
            .filter_map(|e| match e {
                Emitted::Gauge { name, value, tags } => Some((name.as_str(), *value, tags.as_slice())),
                _ => None,
            })
            .collect()
    }

    pub fn increments(&self) -> Vec<(&str, u64, &[String])> {
        self.emitted
            .iter()
            .filter_map(|e| match e {
                Emitted::Increment { name, by, tags } => Some((name.as_str(), *by, tags.as_slice())),
                _ => None,
            })
            .collect()
    }

    pub fn service_checks(&self) -> Vec<(&str, ServiceStatus, Option<&str>)> {
        self.emitted
            .iter()
            .filter_map(|e| match e {
                Emitted::ServiceCheck {
                    name,
                    status,
                    message,
                } => Some((name.as_str(), *status, message.as_deref())),
                _ => None,
            })
            .collect()
    }
}

impl MetricSink for RecordingSink {
    fn gauge(&mut self, name: &str, value: f64, tags: &[String]) {
        self.emitted.push(Emitted::Gauge {
            name: name.to_string(),
            value,
            tags: tags.to_vec(),
        });
    }

    fn increment(&mut self, name: &str, by: u64, tags: &[String]) {
        self.emitted.push(Emitted::Increment {
            name: name.to_string(),
            by,
            tags: tags.to_vec(),
        });
    }

    fn service_check(&mut self, name: &str, status: ServiceStatus, message: Option<&str>) {
        self.emitted.push(Emitted::ServiceCheck {
            name: name.to_string(),
            status,
            message: message.map(str::to_string),
        });
    }
}
