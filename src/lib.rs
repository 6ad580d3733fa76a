mod aggregate;
pub mod checks;
mod config;
mod error;
mod reverse;
mod scanner;
pub mod timestamp;

pub use aggregate::{Aggregate, LatestMatch, ScanFailure, TerminalStatus};
pub use config::{BoundaryKind, ScanConfig, DEFAULT_KEY_CAPTURE};
pub use error::{ErrorCategory, ParseError, Result, ScanError};
pub use reverse::{RawLine, ReverseLineReader, DEFAULT_BUFFER_SIZE};
pub use scanner::{
    scan_file, BoundaryPolicy, MatchPolicy, ParsedLineEvent, ScanWindow, Scanner, Temporal,
};
pub use timestamp::{resolve, ResolvedInstant};
