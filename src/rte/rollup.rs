//! Rollup computed at Terminate
//!
//! Ambiguous tracking data is reported as `unknown`, never guessed: a SCO
//! that reports `completed` without a score gets no score, not 0.

use crate::cmi::{time, DataModel, ScormVersion};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "incomplete")]
    Incomplete,
    #[serde(rename = "not attempted")]
    NotAttempted,
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessStatus {
    Passed,
    Failed,
    Unknown,
}

/// Final outcome of one SCO session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub completion_status: CompletionStatus,
    pub success_status: SuccessStatus,
    /// Normalized 0-100, `None` when the SCO reported nothing usable
    pub score: Option<f64>,
    pub raw_score: Option<f64>,
    /// Prior total plus this session, in the version's time format
    pub total_time: String,
    /// Session time as written by the SCO
    pub session_time: Option<String>,
}

impl Rollup {
    /// Score for display, `"unknown"` when absent
    pub fn score_label(&self) -> String {
        match self.score {
            Some(score) => format!("{}", (score * 100.0).round() / 100.0),
            None => "unknown".to_string(),
        }
    }
}

/// Compute the rollup from a session's data model
///
/// `cmi.total_time` must hold the prior total (seeded at launch).
pub fn compute(model: &DataModel) -> Rollup {
    let version = model.version();
    let paths = model.schema().paths;
    let stored = |path: &str| model.value(path).filter(|v| !v.is_empty());

    let completion_value = stored(paths.completion);
    let completion_status = match version {
        ScormVersion::Scorm12 => match completion_value {
            Some("completed") | Some("passed") | Some("failed") => CompletionStatus::Completed,
            Some("incomplete") | Some("browsed") => CompletionStatus::Incomplete,
            _ => CompletionStatus::NotAttempted,
        },
        ScormVersion::Scorm2004 => match completion_value {
            Some("completed") => CompletionStatus::Completed,
            Some("incomplete") => CompletionStatus::Incomplete,
            Some("not attempted") => CompletionStatus::NotAttempted,
            _ => CompletionStatus::Unknown,
        },
    };

    let success_value = match paths.success {
        Some(path) => stored(path),
        None => completion_value,
    };
    let success_status = match success_value {
        Some("passed") => SuccessStatus::Passed,
        Some("failed") => SuccessStatus::Failed,
        _ => SuccessStatus::Unknown,
    };

    let number = |path: &str| stored(path).and_then(|v| v.parse::<f64>().ok());
    let raw_score = number(paths.score_raw);
    let score = match raw_score {
        Some(raw) => Some(normalize_raw(
            raw,
            number(paths.score_min).unwrap_or(0.0),
            number(paths.score_max).unwrap_or(100.0),
        )),
        None => paths
            .score_scaled
            .and_then(|path| number(path))
            .map(|scaled| (scaled * 100.0).clamp(0.0, 100.0)),
    };

    let session_time = stored(paths.session_time).map(str::to_string);
    let prior = stored(paths.total_time)
        .and_then(|v| time::parse_interval(version, v))
        .unwrap_or(0);
    let session = session_time
        .as_deref()
        .and_then(|v| time::parse_interval(version, v))
        .unwrap_or(0);

    Rollup {
        completion_status,
        success_status,
        score,
        raw_score,
        total_time: time::format_interval(version, prior.saturating_add(session)),
        session_time,
    }
}

fn normalize_raw(raw: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return raw.clamp(0.0, 100.0);
    }
    ((raw - min) / (max - min) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_12_completed_without_score() {
        let mut model = DataModel::new(ScormVersion::Scorm12);
        model.set("cmi.core.lesson_status", "completed").unwrap();
        let rollup = compute(&model);
        assert_eq!(rollup.completion_status, CompletionStatus::Completed);
        assert_eq!(rollup.success_status, SuccessStatus::Unknown);
        assert_eq!(rollup.score, None);
        assert_eq!(rollup.score_label(), "unknown");
    }

    #[test]
    fn test_12_status_mapping() {
        for (status, completion, success) in [
            ("passed", CompletionStatus::Completed, SuccessStatus::Passed),
            ("failed", CompletionStatus::Completed, SuccessStatus::Failed),
            ("browsed", CompletionStatus::Incomplete, SuccessStatus::Unknown),
            ("not attempted", CompletionStatus::NotAttempted, SuccessStatus::Unknown),
        ] {
            let mut model = DataModel::new(ScormVersion::Scorm12);
            model.set("cmi.core.lesson_status", status).unwrap();
            let rollup = compute(&model);
            assert_eq!(rollup.completion_status, completion, "{}", status);
            assert_eq!(rollup.success_status, success, "{}", status);
        }
        let rollup = compute(&DataModel::new(ScormVersion::Scorm12));
        assert_eq!(rollup.completion_status, CompletionStatus::NotAttempted);
    }

    #[test]
    fn test_2004_unset_is_unknown() {
        let rollup = compute(&DataModel::new(ScormVersion::Scorm2004));
        assert_eq!(rollup.completion_status, CompletionStatus::Unknown);
        assert_eq!(rollup.success_status, SuccessStatus::Unknown);
        assert_eq!(rollup.total_time, "PT0H0M0S");
    }

    #[test]
    fn test_score_normalization() {
        let mut model = DataModel::new(ScormVersion::Scorm12);
        model.set("cmi.core.score.raw", "15").unwrap();
        model.set("cmi.core.score.min", "10").unwrap();
        model.set("cmi.core.score.max", "20").unwrap();
        assert_eq!(compute(&model).score, Some(50.0));

        let mut model = DataModel::new(ScormVersion::Scorm12);
        model.set("cmi.core.score.raw", "40").unwrap();
        model.set("cmi.core.score.min", "50").unwrap();
        model.set("cmi.core.score.max", "50").unwrap();
        assert_eq!(compute(&model).score, Some(40.0));

        let mut model = DataModel::new(ScormVersion::Scorm2004);
        model.set("cmi.score.scaled", "-0.5").unwrap();
        assert_eq!(compute(&model).score, Some(0.0));
        model.set("cmi.score.scaled", "0.8").unwrap();
        assert_eq!(compute(&model).score, Some(80.0));
        assert_eq!(compute(&model).raw_score, None);
    }

    #[test]
    fn test_total_time_accumulates() {
        let mut model = DataModel::new(ScormVersion::Scorm12);
        model.seed("cmi.core.total_time", "0001:00:00.00").unwrap();
        model.set("cmi.core.session_time", "0000:30:00").unwrap();
        let rollup = compute(&model);
        assert_eq!(rollup.total_time, "0001:30:00.00");
        assert_eq!(rollup.session_time.as_deref(), Some("0000:30:00"));
    }

    #[test]
    fn test_total_time_saturates() {
        let mut model = DataModel::new(ScormVersion::Scorm2004);
        model.seed("cmi.total_time", "P5000000000Y").unwrap();
        model.set("cmi.session_time", "P5000000000Y").unwrap();
        let rollup = compute(&model);
        assert_eq!(rollup.total_time, time::format_duration(u64::MAX));
    }
}
