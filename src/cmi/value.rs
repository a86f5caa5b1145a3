//! CMI value types and validation
//!
//! Every data model element declares a [`ValueKind`]. `SetValue` runs the
//! incoming string through [`ValueKind::validate`] before anything is stored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SCORM edition a SCO declared at launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScormVersion {
    #[serde(rename = "1.2")]
    Scorm12,
    #[serde(rename = "2004")]
    Scorm2004,
}

impl ScormVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScormVersion::Scorm12 => "1.2",
            ScormVersion::Scorm2004 => "2004",
        }
    }

    /// Parse a version label as found in manifests and launch requests
    ///
    /// Accepts `1.2`, `SCORM 1.2`, `2004`, `SCORM 2004`, `CAM 1.3`,
    /// `2004 3rd Edition` and similar.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return None;
        }
        if normalized.contains("1.2") {
            Some(ScormVersion::Scorm12)
        } else if normalized.contains("2004") || normalized.contains("1.3") {
            Some(ScormVersion::Scorm2004)
        } else {
            None
        }
    }
}

impl fmt::Display for ScormVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access mode of a data model element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Declared type of a data model element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// Free text up to `max` characters
    CharString { max: usize },
    /// Non-empty token without whitespace
    Identifier { max: usize },
    /// One of a fixed set of words
    Vocabulary(&'static [&'static str]),
    /// Real number, optionally bounded (inclusive)
    Decimal { min: Option<f64>, max: Option<f64> },
    /// Signed integer within an inclusive range
    Integer { min: i64, max: i64 },
    /// SCORM 1.2 CMITime, `HH:MM:SS[.SS]`
    Time,
    /// SCORM 1.2 CMITimespan, `HHHH:MM:SS[.SS]`
    Timespan,
    /// SCORM 2004 ISO 8601 timestamp
    Timestamp,
    /// SCORM 2004 ISO 8601 duration
    Duration,
    /// Either a vocabulary word or a real number
    DecimalOrVocabulary(&'static [&'static str]),
}

/// Why a value was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Wrong shape for the declared type
    TypeMismatch(String),
    /// Right shape, outside the permitted range
    OutOfRange(String),
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::TypeMismatch(reason) => write!(f, "type mismatch: {}", reason),
            ValueError::OutOfRange(reason) => write!(f, "out of range: {}", reason),
        }
    }
}

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?(\d+(\.\d*)?|\.\d+)$").expect("valid decimal regex"));

static CMI_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([01]\d|2[0-3]):[0-5]\d:[0-5]\d(\.\d{1,2})?$").expect("valid time regex")
});

static CMI_TIMESPAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2,4}:[0-5]\d:[0-5]\d(\.\d{1,2})?$").expect("valid timespan regex")
});

static ISO_TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01])(T([01]\d|2[0-3])(:[0-5]\d(:[0-5]\d(\.\d{1,2})?)?)?(Z|[+-]([01]\d|2[0-3])(:?[0-5]\d)?)?)?)?)?$",
    )
    .expect("valid timestamp regex")
});

pub(crate) static ISO_DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d{1,2})?)S)?)?$",
    )
    .expect("valid duration regex")
});

impl ValueKind {
    /// Validate a candidate value for this kind
    pub fn validate(&self, value: &str) -> Result<(), ValueError> {
        match self {
            ValueKind::CharString { max } => {
                let len = value.chars().count();
                if len > *max {
                    return Err(ValueError::TypeMismatch(format!(
                        "{} characters exceeds maximum of {}",
                        len, max
                    )));
                }
                Ok(())
            }
            ValueKind::Identifier { max } => {
                if value.is_empty() {
                    return Err(ValueError::TypeMismatch("identifier is empty".to_string()));
                }
                if value.chars().any(char::is_whitespace) {
                    return Err(ValueError::TypeMismatch(
                        "identifier contains whitespace".to_string(),
                    ));
                }
                if value.chars().count() > *max {
                    return Err(ValueError::TypeMismatch(format!(
                        "identifier exceeds {} characters",
                        max
                    )));
                }
                Ok(())
            }
            ValueKind::Vocabulary(words) => {
                if words.contains(&value) {
                    Ok(())
                } else {
                    Err(ValueError::TypeMismatch(format!(
                        "'{}' is not one of [{}]",
                        value,
                        words.join(", ")
                    )))
                }
            }
            ValueKind::Decimal { min, max } => validate_decimal(value, *min, *max),
            ValueKind::Integer { min, max } => {
                let parsed: i64 = value.parse().map_err(|_| {
                    ValueError::TypeMismatch(format!("'{}' is not an integer", value))
                })?;
                if parsed < *min || parsed > *max {
                    return Err(ValueError::OutOfRange(format!(
                        "{} not within {}..={}",
                        parsed, min, max
                    )));
                }
                Ok(())
            }
            ValueKind::Time => matches_format(&CMI_TIME_RE, value, "HH:MM:SS[.SS]"),
            ValueKind::Timespan => matches_format(&CMI_TIMESPAN_RE, value, "HHHH:MM:SS[.SS]"),
            ValueKind::Timestamp => matches_format(&ISO_TIMESTAMP_RE, value, "ISO 8601 timestamp"),
            ValueKind::Duration => {
                // `P` and `PT` alone are not durations
                if value == "P" || value.ends_with('T') {
                    return Err(ValueError::TypeMismatch(format!(
                        "'{}' is not an ISO 8601 duration",
                        value
                    )));
                }
                matches_format(&ISO_DURATION_RE, value, "ISO 8601 duration")?;
                if super::time::parse_duration(value).is_none() {
                    return Err(ValueError::OutOfRange(format!(
                        "'{}' is too long to accumulate",
                        value
                    )));
                }
                Ok(())
            }
            ValueKind::DecimalOrVocabulary(words) => {
                if words.contains(&value) {
                    return Ok(());
                }
                validate_decimal(value, None, None).map_err(|_| {
                    ValueError::TypeMismatch(format!(
                        "'{}' is neither a number nor one of [{}]",
                        value,
                        words.join(", ")
                    ))
                })
            }
        }
    }
}

fn validate_decimal(value: &str, min: Option<f64>, max: Option<f64>) -> Result<(), ValueError> {
    if !DECIMAL_RE.is_match(value) {
        return Err(ValueError::TypeMismatch(format!("'{}' is not a number", value)));
    }
    let parsed: f64 = value
        .parse()
        .map_err(|_| ValueError::TypeMismatch(format!("'{}' is not a number", value)))?;
    if let Some(lower) = min {
        if parsed < lower {
            return Err(ValueError::OutOfRange(format!("{} is below {}", parsed, lower)));
        }
    }
    if let Some(upper) = max {
        if parsed > upper {
            return Err(ValueError::OutOfRange(format!("{} is above {}", parsed, upper)));
        }
    }
    Ok(())
}

fn matches_format(re: &Regex, value: &str, expected: &str) -> Result<(), ValueError> {
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValueError::TypeMismatch(format!(
            "'{}' does not match {}",
            value, expected
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(ScormVersion::parse("1.2"), Some(ScormVersion::Scorm12));
        assert_eq!(ScormVersion::parse("SCORM 1.2"), Some(ScormVersion::Scorm12));
        assert_eq!(ScormVersion::parse("2004 3rd Edition"), Some(ScormVersion::Scorm2004));
        assert_eq!(ScormVersion::parse("CAM 1.3"), Some(ScormVersion::Scorm2004));
        assert_eq!(ScormVersion::parse(""), None);
        assert_eq!(ScormVersion::parse("xAPI"), None);
    }

    #[test]
    fn test_decimal_ranges() {
        let score = ValueKind::Decimal { min: Some(0.0), max: Some(100.0) };
        assert!(score.validate("85").is_ok());
        assert!(score.validate("85.5").is_ok());
        assert!(matches!(score.validate("101"), Err(ValueError::OutOfRange(_))));
        assert!(matches!(score.validate("abc"), Err(ValueError::TypeMismatch(_))));
        assert!(matches!(score.validate(""), Err(ValueError::TypeMismatch(_))));
        assert!(matches!(score.validate("1e3"), Err(ValueError::TypeMismatch(_))));
    }

    #[test]
    fn test_vocabulary() {
        let status = ValueKind::Vocabulary(&["passed", "failed"]);
        assert!(status.validate("passed").is_ok());
        assert!(status.validate("Passed").is_err());
        assert!(status.validate("bogus").is_err());
    }

    #[test]
    fn test_time_formats() {
        assert!(ValueKind::Time.validate("13:05:09").is_ok());
        assert!(ValueKind::Time.validate("25:00:00").is_err());
        assert!(ValueKind::Timespan.validate("0000:00:00.00").is_ok());
        assert!(ValueKind::Timespan.validate("12:30:15.5").is_ok());
        assert!(ValueKind::Timespan.validate("1:30:15").is_err());
        assert!(ValueKind::Timestamp.validate("2024-03-01T10:15:30.5Z").is_ok());
        assert!(ValueKind::Timestamp.validate("2024").is_ok());
        assert!(ValueKind::Timestamp.validate("2024-13-01").is_err());
        assert!(ValueKind::Duration.validate("PT1H30M5.25S").is_ok());
        assert!(ValueKind::Duration.validate("P1D").is_ok());
        assert!(ValueKind::Duration.validate("PT").is_err());
        assert!(ValueKind::Duration.validate("P").is_err());
        assert!(ValueKind::Duration.validate("1H").is_err());
        assert!(matches!(
            ValueKind::Duration.validate("P999999999999Y"),
            Err(ValueError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_identifier_and_union() {
        let id = ValueKind::Identifier { max: 10 };
        assert!(id.validate("q1").is_ok());
        assert!(id.validate("").is_err());
        assert!(id.validate("has space").is_err());
        assert!(id.validate("abcdefghijk").is_err());

        let result = ValueKind::DecimalOrVocabulary(&["correct", "incorrect"]);
        assert!(result.validate("correct").is_ok());
        assert!(result.validate("0.75").is_ok());
        assert!(result.validate("maybe").is_err());
    }
}
