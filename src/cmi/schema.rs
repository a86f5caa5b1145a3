//! Element tables for the SCORM 1.2 and SCORM 2004 data models
//!
//! Patterns use `n` for every collection index, so
//! `cmi.interactions.3.objectives.0.id` resolves against
//! `cmi.interactions.n.objectives.n.id`.

use super::value::{Access, ScormVersion, ValueKind};

/// One data model element
#[derive(Debug, Clone, Copy)]
pub struct ElementDef {
    pub pattern: &'static str,
    pub access: Access,
    pub kind: ValueKind,
    /// Value reported while unset. `None` means "not initialized".
    pub default: Option<&'static str>,
    /// Sibling element that must be set first (SCORM 2004 dependencies)
    pub requires: Option<&'static str>,
}

/// Indexed collection (`cmi.objectives`, `cmi.interactions.n.correct_responses`, ...)
#[derive(Debug, Clone, Copy)]
pub struct CollectionDef {
    pub pattern: &'static str,
    pub children: &'static str,
    /// Field a new record must be opened with, if any
    pub opener: Option<&'static str>,
    /// Records whose `id` must be unique within the collection
    pub unique_ids: bool,
}

/// Non-collection element group that reports `_children`
#[derive(Debug, Clone, Copy)]
pub struct GroupDef {
    pub pattern: &'static str,
    pub children: &'static str,
}

/// Complete data model for one SCORM version
#[derive(Debug)]
pub struct Schema {
    pub version: ScormVersion,
    /// Value of `cmi._version`
    pub data_model_version: &'static str,
    pub elements: &'static [ElementDef],
    pub collections: &'static [CollectionDef],
    pub groups: &'static [GroupDef],
    /// Well-known paths the RTE reads and seeds
    pub paths: KnownPaths,
}

/// Version-specific locations of the elements the LMS side cares about
#[derive(Debug, Clone, Copy)]
pub struct KnownPaths {
    pub learner_id: &'static str,
    pub learner_name: &'static str,
    pub credit: &'static str,
    pub entry: &'static str,
    pub exit: &'static str,
    pub mode: &'static str,
    pub launch_data: &'static str,
    pub mastery: &'static str,
    pub max_time_allowed: &'static str,
    pub time_limit_action: &'static str,
    pub total_time: &'static str,
    pub session_time: &'static str,
    pub suspend_data: &'static str,
    pub score_raw: &'static str,
    pub score_min: &'static str,
    pub score_max: &'static str,
    pub score_scaled: Option<&'static str>,
    /// 1.2 `cmi.core.lesson_status` or 2004 `cmi.completion_status`
    pub completion: &'static str,
    /// 2004 `cmi.success_status`
    pub success: Option<&'static str>,
}

impl Schema {
    pub fn for_version(version: ScormVersion) -> &'static Schema {
        match version {
            ScormVersion::Scorm12 => &SCORM12,
            ScormVersion::Scorm2004 => &SCORM2004,
        }
    }

    pub fn element(&self, pattern: &str) -> Option<&'static ElementDef> {
        self.elements.iter().find(|e| e.pattern == pattern)
    }

    pub fn collection(&self, pattern: &str) -> Option<&'static CollectionDef> {
        self.collections.iter().find(|c| c.pattern == pattern)
    }

    pub fn group(&self, pattern: &str) -> Option<&'static GroupDef> {
        self.groups.iter().find(|g| g.pattern == pattern)
    }

    /// True when `pattern` names anything at all: element, group or collection
    pub fn is_known(&self, pattern: &str) -> bool {
        self.element(pattern).is_some()
            || self.collection(pattern).is_some()
            || self.group(pattern).is_some()
    }

    /// Elements that describe a single attempt and are not carried into the next launch
    pub fn is_session_scoped(&self, pattern: &str) -> bool {
        pattern == self.paths.exit || pattern == self.paths.session_time
    }
}

// ============================================================================
// Table helpers
// ============================================================================

const fn ro(pattern: &'static str, kind: ValueKind) -> ElementDef {
    ElementDef { pattern, access: Access::ReadOnly, kind, default: None, requires: None }
}

const fn ro_d(pattern: &'static str, kind: ValueKind, default: &'static str) -> ElementDef {
    ElementDef { pattern, access: Access::ReadOnly, kind, default: Some(default), requires: None }
}

const fn rw(pattern: &'static str, kind: ValueKind) -> ElementDef {
    ElementDef { pattern, access: Access::ReadWrite, kind, default: None, requires: None }
}

const fn rw_d(pattern: &'static str, kind: ValueKind, default: &'static str) -> ElementDef {
    ElementDef { pattern, access: Access::ReadWrite, kind, default: Some(default), requires: None }
}

const fn rw_req(pattern: &'static str, kind: ValueKind, requires: &'static str) -> ElementDef {
    ElementDef { pattern, access: Access::ReadWrite, kind, default: None, requires: Some(requires) }
}

const fn wo(pattern: &'static str, kind: ValueKind) -> ElementDef {
    ElementDef { pattern, access: Access::WriteOnly, kind, default: None, requires: None }
}

const fn collection(pattern: &'static str, children: &'static str) -> CollectionDef {
    CollectionDef { pattern, children, opener: None, unique_ids: false }
}

const fn opened_by_id(pattern: &'static str, children: &'static str, unique_ids: bool) -> CollectionDef {
    CollectionDef { pattern, children, opener: Some("id"), unique_ids }
}

const fn group(pattern: &'static str, children: &'static str) -> GroupDef {
    GroupDef { pattern, children }
}

const fn text(max: usize) -> ValueKind {
    ValueKind::CharString { max }
}

const fn ident(max: usize) -> ValueKind {
    ValueKind::Identifier { max }
}

const fn decimal(min: f64, max: f64) -> ValueKind {
    ValueKind::Decimal { min: Some(min), max: Some(max) }
}

const ANY_DECIMAL: ValueKind = ValueKind::Decimal { min: None, max: None };

// ============================================================================
// Shared vocabularies
// ============================================================================

pub const LESSON_STATUS: &[&str] =
    &["passed", "completed", "failed", "incomplete", "browsed", "not attempted"];
pub const COMPLETION_STATUS: &[&str] = &["completed", "incomplete", "not attempted", "unknown"];
pub const SUCCESS_STATUS: &[&str] = &["passed", "failed", "unknown"];

const CREDIT: &[&str] = &["credit", "no-credit"];
const ENTRY: &[&str] = &["ab-initio", "resume", ""];
const MODE: &[&str] = &["browse", "normal", "review"];
const TIME_LIMIT_ACTION: &[&str] =
    &["exit,message", "exit,no message", "continue,message", "continue,no message"];

const EXIT_12: &[&str] = &["time-out", "suspend", "logout", ""];
const EXIT_2004: &[&str] = &["time-out", "suspend", "logout", "normal", ""];

const INTERACTION_TYPE_12: &[&str] = &[
    "true-false", "choice", "fill-in", "matching", "performance", "sequencing", "likert", "numeric",
];
const INTERACTION_TYPE_2004: &[&str] = &[
    "true-false", "choice", "fill-in", "long-fill-in", "matching", "performance", "sequencing",
    "likert", "numeric", "other",
];
const RESULT_12: &[&str] = &["correct", "wrong", "unanticipated", "neutral"];
const RESULT_2004: &[&str] = &["correct", "incorrect", "unanticipated", "neutral"];

// ============================================================================
// SCORM 1.2
// ============================================================================

const SCORM12_ELEMENTS: &[ElementDef] = &[
    ro("cmi.core.student_id", ident(255)),
    ro("cmi.core.student_name", text(255)),
    rw_d("cmi.core.lesson_location", text(255), ""),
    ro_d("cmi.core.credit", ValueKind::Vocabulary(CREDIT), "credit"),
    rw_d("cmi.core.lesson_status", ValueKind::Vocabulary(LESSON_STATUS), "not attempted"),
    ro_d("cmi.core.entry", ValueKind::Vocabulary(ENTRY), ""),
    rw_d("cmi.core.score.raw", decimal(0.0, 100.0), ""),
    rw_d("cmi.core.score.min", decimal(0.0, 100.0), ""),
    rw_d("cmi.core.score.max", decimal(0.0, 100.0), ""),
    ro_d("cmi.core.total_time", ValueKind::Timespan, "0000:00:00.00"),
    ro_d("cmi.core.lesson_mode", ValueKind::Vocabulary(MODE), "normal"),
    wo("cmi.core.exit", ValueKind::Vocabulary(EXIT_12)),
    wo("cmi.core.session_time", ValueKind::Timespan),
    rw_d("cmi.suspend_data", text(4096), ""),
    ro_d("cmi.launch_data", text(4096), ""),
    rw_d("cmi.comments", text(4096), ""),
    ro_d("cmi.comments_from_lms", text(4096), ""),
    rw("cmi.objectives.n.id", ident(255)),
    rw_d("cmi.objectives.n.score.raw", decimal(0.0, 100.0), ""),
    rw_d("cmi.objectives.n.score.min", decimal(0.0, 100.0), ""),
    rw_d("cmi.objectives.n.score.max", decimal(0.0, 100.0), ""),
    rw_d("cmi.objectives.n.status", ValueKind::Vocabulary(LESSON_STATUS), "not attempted"),
    ro_d("cmi.student_data.mastery_score", decimal(0.0, 100.0), ""),
    ro_d("cmi.student_data.max_time_allowed", ValueKind::Timespan, ""),
    ro_d("cmi.student_data.time_limit_action", ValueKind::Vocabulary(TIME_LIMIT_ACTION), "continue,no message"),
    rw_d("cmi.student_preference.audio", ValueKind::Integer { min: -1, max: 100 }, "0"),
    rw_d("cmi.student_preference.language", text(255), ""),
    rw_d("cmi.student_preference.speed", ValueKind::Integer { min: -100, max: 100 }, "0"),
    rw_d("cmi.student_preference.text", ValueKind::Integer { min: -1, max: 1 }, "0"),
    wo("cmi.interactions.n.id", ident(255)),
    wo("cmi.interactions.n.objectives.n.id", ident(255)),
    wo("cmi.interactions.n.time", ValueKind::Time),
    wo("cmi.interactions.n.type", ValueKind::Vocabulary(INTERACTION_TYPE_12)),
    wo("cmi.interactions.n.correct_responses.n.pattern", text(255)),
    wo("cmi.interactions.n.weighting", ANY_DECIMAL),
    wo("cmi.interactions.n.student_response", text(255)),
    wo("cmi.interactions.n.result", ValueKind::DecimalOrVocabulary(RESULT_12)),
    wo("cmi.interactions.n.latency", ValueKind::Timespan),
];

const SCORM12_COLLECTIONS: &[CollectionDef] = &[
    collection("cmi.objectives", "id,score,status"),
    collection(
        "cmi.interactions",
        "id,objectives,time,type,correct_responses,weighting,student_response,result,latency",
    ),
    collection("cmi.interactions.n.objectives", "id"),
    collection("cmi.interactions.n.correct_responses", "pattern"),
];

const SCORM12_GROUPS: &[GroupDef] = &[
    group(
        "cmi.core",
        "student_id,student_name,lesson_location,credit,lesson_status,entry,score,total_time,lesson_mode,exit,session_time",
    ),
    group("cmi.core.score", "raw,min,max"),
    group("cmi.objectives.n.score", "raw,min,max"),
    group("cmi.student_data", "mastery_score,max_time_allowed,time_limit_action"),
    group("cmi.student_preference", "audio,language,speed,text"),
];

static SCORM12: Schema = Schema {
    version: ScormVersion::Scorm12,
    data_model_version: "3.4",
    elements: SCORM12_ELEMENTS,
    collections: SCORM12_COLLECTIONS,
    groups: SCORM12_GROUPS,
    paths: KnownPaths {
        learner_id: "cmi.core.student_id",
        learner_name: "cmi.core.student_name",
        credit: "cmi.core.credit",
        entry: "cmi.core.entry",
        exit: "cmi.core.exit",
        mode: "cmi.core.lesson_mode",
        launch_data: "cmi.launch_data",
        mastery: "cmi.student_data.mastery_score",
        max_time_allowed: "cmi.student_data.max_time_allowed",
        time_limit_action: "cmi.student_data.time_limit_action",
        total_time: "cmi.core.total_time",
        session_time: "cmi.core.session_time",
        suspend_data: "cmi.suspend_data",
        score_raw: "cmi.core.score.raw",
        score_min: "cmi.core.score.min",
        score_max: "cmi.core.score.max",
        score_scaled: None,
        completion: "cmi.core.lesson_status",
        success: None,
    },
};

// ============================================================================
// SCORM 2004
// ============================================================================

const SCORM2004_ELEMENTS: &[ElementDef] = &[
    rw("cmi.comments_from_learner.n.comment", text(4000)),
    rw("cmi.comments_from_learner.n.location", text(250)),
    rw("cmi.comments_from_learner.n.timestamp", ValueKind::Timestamp),
    ro("cmi.comments_from_lms.n.comment", text(4000)),
    ro("cmi.comments_from_lms.n.location", text(250)),
    ro("cmi.comments_from_lms.n.timestamp", ValueKind::Timestamp),
    rw_d("cmi.completion_status", ValueKind::Vocabulary(COMPLETION_STATUS), "unknown"),
    ro("cmi.completion_threshold", decimal(0.0, 1.0)),
    ro_d("cmi.credit", ValueKind::Vocabulary(CREDIT), "credit"),
    ro_d("cmi.entry", ValueKind::Vocabulary(ENTRY), ""),
    wo("cmi.exit", ValueKind::Vocabulary(EXIT_2004)),
    rw("cmi.interactions.n.id", ident(4000)),
    rw("cmi.interactions.n.type", ValueKind::Vocabulary(INTERACTION_TYPE_2004)),
    rw("cmi.interactions.n.objectives.n.id", ident(4000)),
    rw("cmi.interactions.n.timestamp", ValueKind::Timestamp),
    rw_req(
        "cmi.interactions.n.correct_responses.n.pattern",
        text(4000),
        "cmi.interactions.n.type",
    ),
    rw("cmi.interactions.n.weighting", ANY_DECIMAL),
    rw_req("cmi.interactions.n.learner_response", text(4000), "cmi.interactions.n.type"),
    rw("cmi.interactions.n.result", ValueKind::DecimalOrVocabulary(RESULT_2004)),
    rw("cmi.interactions.n.latency", ValueKind::Duration),
    rw("cmi.interactions.n.description", text(250)),
    ro("cmi.launch_data", text(4000)),
    ro("cmi.learner_id", ident(4000)),
    ro("cmi.learner_name", text(250)),
    rw_d("cmi.learner_preference.audio_level", ValueKind::Decimal { min: Some(0.0), max: None }, "1"),
    rw_d("cmi.learner_preference.language", text(250), ""),
    rw_d("cmi.learner_preference.delivery_speed", ValueKind::Decimal { min: Some(0.0), max: None }, "1"),
    rw_d("cmi.learner_preference.audio_captioning", ValueKind::Integer { min: -1, max: 1 }, "0"),
    rw("cmi.location", text(1000)),
    ro("cmi.max_time_allowed", ValueKind::Duration),
    ro_d("cmi.mode", ValueKind::Vocabulary(MODE), "normal"),
    rw("cmi.objectives.n.id", ident(4000)),
    rw("cmi.objectives.n.score.scaled", decimal(-1.0, 1.0)),
    rw("cmi.objectives.n.score.raw", ANY_DECIMAL),
    rw("cmi.objectives.n.score.min", ANY_DECIMAL),
    rw("cmi.objectives.n.score.max", ANY_DECIMAL),
    rw_d("cmi.objectives.n.success_status", ValueKind::Vocabulary(SUCCESS_STATUS), "unknown"),
    rw_d("cmi.objectives.n.completion_status", ValueKind::Vocabulary(COMPLETION_STATUS), "unknown"),
    rw("cmi.objectives.n.progress_measure", decimal(0.0, 1.0)),
    rw("cmi.objectives.n.description", text(250)),
    rw("cmi.progress_measure", decimal(0.0, 1.0)),
    ro("cmi.scaled_passing_score", decimal(-1.0, 1.0)),
    rw("cmi.score.scaled", decimal(-1.0, 1.0)),
    rw("cmi.score.raw", ANY_DECIMAL),
    rw("cmi.score.min", ANY_DECIMAL),
    rw("cmi.score.max", ANY_DECIMAL),
    wo("cmi.session_time", ValueKind::Duration),
    rw_d("cmi.success_status", ValueKind::Vocabulary(SUCCESS_STATUS), "unknown"),
    rw("cmi.suspend_data", text(64000)),
    ro_d("cmi.time_limit_action", ValueKind::Vocabulary(TIME_LIMIT_ACTION), "continue,no message"),
    ro_d("cmi.total_time", ValueKind::Duration, "PT0H0M0S"),
];

const SCORM2004_COLLECTIONS: &[CollectionDef] = &[
    collection("cmi.comments_from_learner", "comment,location,timestamp"),
    collection("cmi.comments_from_lms", "comment,location,timestamp"),
    opened_by_id(
        "cmi.interactions",
        "id,type,objectives,timestamp,correct_responses,weighting,learner_response,result,latency,description",
        false,
    ),
    collection("cmi.interactions.n.objectives", "id"),
    collection("cmi.interactions.n.correct_responses", "pattern"),
    opened_by_id(
        "cmi.objectives",
        "id,score,success_status,completion_status,progress_measure,description",
        true,
    ),
];

const SCORM2004_GROUPS: &[GroupDef] = &[
    group("cmi.score", "scaled,raw,min,max"),
    group("cmi.objectives.n.score", "scaled,raw,min,max"),
    group("cmi.learner_preference", "audio_level,language,delivery_speed,audio_captioning"),
];

static SCORM2004: Schema = Schema {
    version: ScormVersion::Scorm2004,
    data_model_version: "1.0",
    elements: SCORM2004_ELEMENTS,
    collections: SCORM2004_COLLECTIONS,
    groups: SCORM2004_GROUPS,
    paths: KnownPaths {
        learner_id: "cmi.learner_id",
        learner_name: "cmi.learner_name",
        credit: "cmi.credit",
        entry: "cmi.entry",
        exit: "cmi.exit",
        mode: "cmi.mode",
        launch_data: "cmi.launch_data",
        mastery: "cmi.scaled_passing_score",
        max_time_allowed: "cmi.max_time_allowed",
        time_limit_action: "cmi.time_limit_action",
        total_time: "cmi.total_time",
        session_time: "cmi.session_time",
        suspend_data: "cmi.suspend_data",
        score_raw: "cmi.score.raw",
        score_min: "cmi.score.min",
        score_max: "cmi.score.max",
        score_scaled: Some("cmi.score.scaled"),
        completion: "cmi.completion_status",
        success: Some("cmi.success_status"),
    },
};
