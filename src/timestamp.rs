//! Resolution of year-less timestamps.
//!
//! Classic syslog lines (`Nov 29 02:11:05 host kernel: ...`) carry no year.
//! [`resolve`] fills one in relative to a reference instant: it builds the
//! candidates "same year as `now`" and "the year before" and keeps whichever
//! lies closer to `now`. A line written on Dec 31 and read on Jan 1 therefore
//! lands in the previous year, while a line from a host whose clock runs a
//! little ahead is read as slightly in the future instead of a year ago.

use crate::error::ParseError;
use chrono::format::{self, Parsed, StrftimeItems};
use chrono::{Datelike, NaiveDateTime, TimeDelta};

/// A timestamp with a concrete year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInstant {
    /// The fully-qualified point in time.
    pub instant: NaiveDateTime,
    /// The year chosen for (or parsed from) the timestamp.
    pub year: i32,
    /// `instant - now`: negative for the past, positive for the future.
    pub offset_from_now: TimeDelta,
}

impl ResolvedInstant {
    fn new(instant: NaiveDateTime, now: NaiveDateTime) -> Self {
        ResolvedInstant {
            instant,
            year: instant.year(),
            offset_from_now: instant - now,
        }
    }
}

/// Parse `timestamp` with the strftime-style `format`, supplying a year if the
/// format has none.
///
/// If the format carries a year (`%Y`, `%y`, `%F`, ...) this is a plain parse.
/// Otherwise the candidate in `now`'s year wins ties.
///
/// # Errors
///
/// Returns [`ParseError::Timestamp`] if the string does not match the format
/// and [`ParseError::NoValidYear`] if the parsed month/day exists in neither
/// candidate year.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use kernscan::resolve;
///
/// let now = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let resolved = resolve("Dec 31 23:59:59", "%b %d %H:%M:%S", now).unwrap();
/// assert_eq!(resolved.year, 2018);
/// assert!(resolved.offset_from_now < chrono::TimeDelta::zero());
/// ```
pub fn resolve(
    timestamp: &str,
    format: &str,
    now: NaiveDateTime,
) -> Result<ResolvedInstant, ParseError> {
    let mut parsed = Parsed::new();
    format::parse(&mut parsed, timestamp, StrftimeItems::new(format)).map_err(|source| {
        ParseError::Timestamp {
            timestamp: timestamp.to_string(),
            format: format.to_string(),
            source,
        }
    })?;

    if let Ok(instant) = parsed.to_naive_datetime_with_offset(0) {
        return Ok(ResolvedInstant::new(instant, now));
    }

    let this_year = now.year();
    let last_year = this_year - 1;
    let instant = match (
        with_year(&parsed, this_year),
        with_year(&parsed, last_year),
    ) {
        (Some(current), Some(previous)) => {
            if (current - now).abs() <= (previous - now).abs() {
                current
            } else {
                previous
            }
        }
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => {
            return Err(ParseError::NoValidYear {
                timestamp: timestamp.to_string(),
                this_year,
                last_year,
            });
        }
    };

    Ok(ResolvedInstant::new(instant, now))
}

fn with_year(parsed: &Parsed, year: i32) -> Option<NaiveDateTime> {
    let mut parsed = parsed.clone();
    parsed.set_year(i64::from(year)).ok()?;
    parsed.to_naive_datetime_with_offset(0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_exact_tie_prefers_current_year() {
        // 182.5 days after 2018-12-31 12:00 and 182.5 days before 2019-12-31 12:00.
        let now = at(2019, 7, 2, 0, 0, 0);
        assert_eq!(at(2019, 12, 31, 12, 0, 0) - now, now - at(2018, 12, 31, 12, 0, 0));

        let resolved = resolve("Dec 31 12:00:00", "%b %d %H:%M:%S", now).unwrap();
        assert_eq!(resolved.year, 2019);
        assert!(resolved.offset_from_now > TimeDelta::zero());
    }

    #[test]
    fn test_leap_day_uses_the_only_valid_year() {
        let now = at(2021, 1, 15, 0, 0, 0);
        let resolved = resolve("Feb 29 00:00:00", "%b %d %H:%M:%S", now).unwrap();
        assert_eq!(resolved.year, 2020);
    }

    #[test]
    fn test_leap_day_without_leap_year_candidate() {
        let resolved = resolve("Feb 29 00:00:00", "%b %d %H:%M:%S", at(2019, 3, 1, 0, 0, 0));
        assert!(matches!(
            resolved,
            Err(ParseError::NoValidYear {
                this_year: 2019,
                last_year: 2018,
                ..
            })
        ));
    }
}
