//! Session time arithmetic
//!
//! SCORM 1.2 reports time as CMITimespan (`HHHH:MM:SS.SS`), SCORM 2004 as
//! ISO 8601 durations (`PT1H2M3.5S`). Both are normalized to centiseconds so
//! `total_time` can be accumulated across sessions. Parsing is checked: a
//! value whose centisecond count does not fit in a `u64` does not parse.

use super::value::{ScormVersion, ISO_DURATION_RE};

const CS_PER_SECOND: u64 = 100;
const CS_PER_MINUTE: u64 = 60 * CS_PER_SECOND;
const CS_PER_HOUR: u64 = 60 * CS_PER_MINUTE;
const CS_PER_DAY: u64 = 24 * CS_PER_HOUR;

/// Parse a version-specific time interval into centiseconds
pub fn parse_interval(version: ScormVersion, value: &str) -> Option<u64> {
    match version {
        ScormVersion::Scorm12 => parse_timespan(value),
        ScormVersion::Scorm2004 => parse_duration(value),
    }
}

/// Format centiseconds as a version-specific time interval
pub fn format_interval(version: ScormVersion, centis: u64) -> String {
    match version {
        ScormVersion::Scorm12 => format_timespan(centis),
        ScormVersion::Scorm2004 => format_duration(centis),
    }
}

/// Parse `HHHH:MM:SS[.SS]`
pub fn parse_timespan(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds = parts.next()?;
    if parts.next().is_some() || minutes > 59 {
        return None;
    }
    let secs_cs = parse_seconds(seconds)?;
    if secs_cs >= CS_PER_MINUTE {
        return None;
    }
    hours
        .checked_mul(CS_PER_HOUR)?
        .checked_add(minutes * CS_PER_MINUTE + secs_cs)
}

/// Parse an ISO 8601 duration
///
/// Years count as 365 days and months as 30 days. SCOs report session
/// lengths, so calendar-accurate arithmetic is not needed.
pub fn parse_duration(value: &str) -> Option<u64> {
    if value == "P" || value.ends_with('T') {
        return None;
    }
    let caps = ISO_DURATION_RE.captures(value)?;
    let num = |idx: usize| -> Option<u64> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    let years = num(1)?;
    let months = num(2)?;
    let days = num(3)?;
    let hours = num(4)?;
    let minutes = num(5)?;
    let seconds = match caps.get(6) {
        Some(m) => parse_seconds(m.as_str())?,
        None => 0,
    };
    [
        (years, 365 * CS_PER_DAY),
        (months, 30 * CS_PER_DAY),
        (days, CS_PER_DAY),
        (hours, CS_PER_HOUR),
        (minutes, CS_PER_MINUTE),
    ]
    .iter()
    .try_fold(seconds, |total, (count, unit)| total.checked_add(count.checked_mul(*unit)?))
}

/// `SS[.S[S]]` into centiseconds
fn parse_seconds(value: &str) -> Option<u64> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let whole: u64 = whole.parse().ok()?;
    let frac_cs = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().ok()? * 10,
        2 => frac.parse::<u64>().ok()?,
        _ => return None,
    };
    whole.checked_mul(CS_PER_SECOND)?.checked_add(frac_cs)
}

pub fn format_timespan(centis: u64) -> String {
    let hours = centis / CS_PER_HOUR;
    let minutes = (centis % CS_PER_HOUR) / CS_PER_MINUTE;
    let seconds = (centis % CS_PER_MINUTE) / CS_PER_SECOND;
    let cs = centis % CS_PER_SECOND;
    format!("{:04}:{:02}:{:02}.{:02}", hours, minutes, seconds, cs)
}

pub fn format_duration(centis: u64) -> String {
    let hours = centis / CS_PER_HOUR;
    let minutes = (centis % CS_PER_HOUR) / CS_PER_MINUTE;
    let seconds = (centis % CS_PER_MINUTE) / CS_PER_SECOND;
    let cs = centis % CS_PER_SECOND;
    if cs == 0 {
        format!("PT{}H{}M{}S", hours, minutes, seconds)
    } else {
        format!("PT{}H{}M{}.{:02}S", hours, minutes, seconds, cs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespan_round_trip() {
        assert_eq!(parse_timespan("0001:30:15.5"), Some(CS_PER_HOUR + 30 * CS_PER_MINUTE + 1550));
        assert_eq!(format_timespan(CS_PER_HOUR + 30 * CS_PER_MINUTE + 1550), "0001:30:15.50");
        assert_eq!(parse_timespan("00:61:00"), None);
        assert_eq!(format_timespan(0), "0000:00:00.00");
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(parse_duration("PT1H2M3S"), Some(CS_PER_HOUR + 2 * CS_PER_MINUTE + 300));
        assert_eq!(parse_duration("PT0.25S"), Some(25));
        assert_eq!(parse_duration("P1D"), Some(CS_PER_DAY));
        assert_eq!(parse_duration("PT"), None);
        assert_eq!(parse_duration("garbage"), None);
    }

    #[test]
    fn test_duration_format() {
        assert_eq!(format_duration(0), "PT0H0M0S");
        assert_eq!(format_duration(CS_PER_HOUR + 5), "PT1H0M0.05S");
    }

    #[test]
    fn test_accumulate_across_versions() {
        let prior = parse_interval(ScormVersion::Scorm2004, "PT10M").unwrap();
        let session = parse_interval(ScormVersion::Scorm2004, "PT5M30S").unwrap();
        assert_eq!(format_interval(ScormVersion::Scorm2004, prior + session), "PT0H15M30S");
    }

    #[test]
    fn test_oversized_values_do_not_parse() {
        assert_eq!(parse_duration("P999999999999Y"), None);
        assert_eq!(parse_duration("PT99999999999999999999S"), None);
        assert_eq!(parse_duration("PT184467440737095517S"), None);
        assert_eq!(parse_duration("P1000Y"), Some(1000 * 365 * CS_PER_DAY));
        assert_eq!(parse_timespan("99999999999999999:00:00"), None);
    }
}
