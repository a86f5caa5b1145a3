//! CMI Data Model Store
//!
//! Typed, validated tracking state for one SCO.
//!
//! ## Architecture
//!
//! ```text
//! GetValue/SetValue path ──► resolve() ──► Resolved::{Element, Count, Children, Version}
//!                                 │
//!                                 ▼
//!                     Schema (1.2 or 2004 element tables)
//!                                 │
//!                                 ▼
//!               values: path → string      counts: collection → size
//! ```
//!
//! `set` is atomic: every check runs before the first mutation, so a
//! rejected write leaves the store exactly as it was.

pub mod schema;
pub mod time;
pub mod value;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use schema::{ElementDef, Schema};
pub use value::{Access, ScormVersion, ValueError, ValueKind};

/// Why a data model access was refused
#[derive(Debug, Clone, PartialEq)]
pub enum DataModelError {
    /// Path does not name any element
    Undefined(String),
    ReadOnly(String),
    WriteOnly(String),
    /// `_count`, `_children` or `_version` used as a SetValue target
    Keyword(String),
    /// 2004 element that has no value and no default
    NotInitialized(String),
    /// Index at or beyond `_count` on read, or beyond `_count` on write
    IndexOutOfRange { path: String, index: usize, count: usize },
    TypeMismatch { path: String, reason: String },
    OutOfRange { path: String, reason: String },
    /// 2004 record opened without its identifier, or a prerequisite element unset
    DependencyNotEstablished { path: String, requires: String },
    /// 2004 objective identifier already used, or changed after being set
    DuplicateIdentifier { path: String, id: String },
    /// `_children` asked of an element without children
    NoChildren(String),
    /// `_count` asked of an element that is not a collection
    NotAnArray(String),
}

impl fmt::Display for DataModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataModelError::Undefined(path) => write!(f, "{} is not a defined data model element", path),
            DataModelError::ReadOnly(path) => write!(f, "{} is read-only", path),
            DataModelError::WriteOnly(path) => write!(f, "{} is write-only", path),
            DataModelError::Keyword(path) => write!(f, "{} is a keyword and cannot be set", path),
            DataModelError::NotInitialized(path) => write!(f, "{} has not been initialized", path),
            DataModelError::IndexOutOfRange { path, index, count } => write!(
                f,
                "{}: index {} is out of range (_count is {})",
                path, index, count
            ),
            DataModelError::TypeMismatch { path, reason } => write!(f, "{}: {}", path, reason),
            DataModelError::OutOfRange { path, reason } => write!(f, "{}: {}", path, reason),
            DataModelError::DependencyNotEstablished { path, requires } => {
                write!(f, "{} requires {} to be set first", path, requires)
            }
            DataModelError::DuplicateIdentifier { path, id } => {
                write!(f, "{}: identifier '{}' is already in use", path, id)
            }
            DataModelError::NoChildren(path) => write!(f, "{} does not have children", path),
            DataModelError::NotAnArray(path) => write!(f, "{} is not a collection", path),
        }
    }
}

impl std::error::Error for DataModelError {}

/// A concrete collection level touched by a path
#[derive(Debug, Clone)]
struct CollectionRef {
    /// Concrete path, e.g. `cmi.interactions.2.objectives`
    path: String,
    def: &'static schema::CollectionDef,
    index: usize,
    /// Field path relative to the record, e.g. `objectives.0.id` or `id`
    field: String,
}

enum Resolved {
    Element { def: &'static ElementDef, collections: Vec<CollectionRef> },
    Count { collection: String },
    Children(&'static str),
    Version,
}

/// One SCO's tracking state
#[derive(Debug, Clone)]
pub struct DataModel {
    version: ScormVersion,
    schema: &'static Schema,
    values: BTreeMap<String, String>,
    counts: BTreeMap<String, usize>,
}

impl DataModel {
    pub fn new(version: ScormVersion) -> Self {
        Self {
            version,
            schema: Schema::for_version(version),
            values: BTreeMap::new(),
            counts: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> ScormVersion {
        self.version
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    // ========================================================================
    // SCO-facing access
    // ========================================================================

    /// GetValue semantics
    pub fn get(&self, path: &str) -> Result<String, DataModelError> {
        match self.resolve(path)? {
            Resolved::Version => Ok(self.schema.data_model_version.to_string()),
            Resolved::Children(children) => Ok(children.to_string()),
            Resolved::Count { collection } => Ok(self.count(&collection).to_string()),
            Resolved::Element { def, collections } => {
                if !def.access.readable() {
                    return Err(DataModelError::WriteOnly(path.to_string()));
                }
                for level in &collections {
                    let count = self.count(&level.path);
                    if level.index >= count {
                        return Err(DataModelError::IndexOutOfRange {
                            path: path.to_string(),
                            index: level.index,
                            count,
                        });
                    }
                }
                if let Some(value) = self.values.get(path) {
                    return Ok(value.clone());
                }
                match (def.default, self.version) {
                    (Some(default), _) => Ok(default.to_string()),
                    (None, ScormVersion::Scorm12) => Ok(String::new()),
                    (None, ScormVersion::Scorm2004) => {
                        Err(DataModelError::NotInitialized(path.to_string()))
                    }
                }
            }
        }
    }

    /// SetValue semantics
    ///
    /// Writing index `_count` of a collection appends a record.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), DataModelError> {
        let (def, collections) = match self.resolve(path)? {
            Resolved::Element { def, collections } => (def, collections),
            _ => return Err(DataModelError::Keyword(path.to_string())),
        };
        if !def.access.writable() {
            return Err(DataModelError::ReadOnly(path.to_string()));
        }

        def.kind.validate(value).map_err(|e| match e {
            ValueError::TypeMismatch(reason) => DataModelError::TypeMismatch {
                path: path.to_string(),
                reason,
            },
            ValueError::OutOfRange(reason) => DataModelError::OutOfRange {
                path: path.to_string(),
                reason,
            },
        })?;

        let mut appended = Vec::new();
        for level in &collections {
            let count = self.count(&level.path);
            if level.index > count {
                return Err(DataModelError::IndexOutOfRange {
                    path: path.to_string(),
                    index: level.index,
                    count,
                });
            }
            if level.index == count {
                if self.version == ScormVersion::Scorm2004 {
                    if let Some(opener) = level.def.opener {
                        if level.field != opener {
                            return Err(DataModelError::DependencyNotEstablished {
                                path: path.to_string(),
                                requires: format!("{}.{}.{}", level.path, level.index, opener),
                            });
                        }
                    }
                }
                appended.push(level.path.clone());
            }
        }

        if self.version == ScormVersion::Scorm2004 {
            if let Some(requires) = def.requires {
                let required = instantiate(requires, &collections);
                if !self.values.contains_key(&required) {
                    return Err(DataModelError::DependencyNotEstablished {
                        path: path.to_string(),
                        requires: required,
                    });
                }
            }
            if let Some(level) = collections.last() {
                if level.field == "id" && level.def.unique_ids {
                    self.check_identifier(path, level, value)?;
                }
            }
        }

        for collection in appended {
            *self.counts.entry(collection).or_insert(0) += 1;
        }
        self.values.insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn check_identifier(
        &self,
        path: &str,
        level: &CollectionRef,
        value: &str,
    ) -> Result<(), DataModelError> {
        if let Some(existing) = self.values.get(path) {
            if existing != value {
                return Err(DataModelError::DuplicateIdentifier {
                    path: path.to_string(),
                    id: value.to_string(),
                });
            }
            return Ok(());
        }
        for sibling in 0..self.count(&level.path) {
            if sibling == level.index {
                continue;
            }
            let sibling_path = format!("{}.{}.id", level.path, sibling);
            if self.values.get(&sibling_path).map(String::as_str) == Some(value) {
                return Err(DataModelError::DuplicateIdentifier {
                    path: path.to_string(),
                    id: value.to_string(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // LMS-facing access
    // ========================================================================

    /// Write an LMS-provided value, bypassing access mode
    ///
    /// Used at launch for read-only elements (learner id, entry, credit, ...)
    /// and at Terminate for the accumulated total time. The value is still
    /// validated against the element's declared type.
    pub fn seed(&mut self, path: &str, value: &str) -> Result<(), DataModelError> {
        let def = match self.resolve(path)? {
            Resolved::Element { def, collections } if collections.is_empty() => def,
            _ => return Err(DataModelError::Keyword(path.to_string())),
        };
        def.kind.validate(value).map_err(|e| DataModelError::TypeMismatch {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.values.insert(path.to_string(), value.to_string());
        Ok(())
    }

    /// Load persisted values and collection sizes from a prior session
    ///
    /// Unknown paths and per-attempt elements are skipped.
    pub fn restore(&mut self, values: &BTreeMap<String, String>, counts: &BTreeMap<String, usize>) {
        for (path, value) in values {
            let segments: Vec<&str> = path.split('.').collect();
            let pattern = normalize_segments(&segments);
            if !is_canonical(&segments)
                || self.schema.element(&pattern).is_none()
                || self.schema.is_session_scoped(&pattern)
            {
                continue;
            }
            self.values.insert(path.clone(), value.clone());
        }
        for (collection, count) in counts {
            if self.schema.collection(&normalize(collection)).is_some() {
                let slot = self.counts.entry(collection.clone()).or_insert(0);
                *slot = (*slot).max(*count);
            }
        }
    }

    /// Raw stored value, ignoring access mode and defaults
    pub fn value(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }

    /// Size of a concrete collection (`cmi.interactions`, `cmi.interactions.0.objectives`)
    pub fn count(&self, collection: &str) -> usize {
        self.counts.get(collection).copied().unwrap_or(0)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn counts(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    // ========================================================================
    // Typed record views
    // ========================================================================

    /// All interaction records in append order
    pub fn interactions(&self) -> Vec<InteractionRecord> {
        let learner_response = match self.version {
            ScormVersion::Scorm12 => "student_response",
            ScormVersion::Scorm2004 => "learner_response",
        };
        let timestamp = match self.version {
            ScormVersion::Scorm12 => "time",
            ScormVersion::Scorm2004 => "timestamp",
        };
        (0..self.count("cmi.interactions"))
            .map(|index| {
                let base = format!("cmi.interactions.{}", index);
                let field = |name: &str| self.values.get(&format!("{}.{}", base, name)).cloned();
                let objectives = format!("{}.objectives", base);
                let responses = format!("{}.correct_responses", base);
                InteractionRecord {
                    index,
                    id: field("id"),
                    interaction_type: field("type"),
                    learner_response: field(learner_response),
                    correct_responses: (0..self.count(&responses))
                        .filter_map(|i| self.values.get(&format!("{}.{}.pattern", responses, i)).cloned())
                        .collect(),
                    result: field("result"),
                    latency: field("latency"),
                    timestamp: field(timestamp),
                    weighting: field("weighting"),
                    description: field("description"),
                    objective_ids: (0..self.count(&objectives))
                        .filter_map(|i| self.values.get(&format!("{}.{}.id", objectives, i)).cloned())
                        .collect(),
                }
            })
            .collect()
    }

    /// All objective records in append order
    pub fn objectives(&self) -> Vec<ObjectiveRecord> {
        (0..self.count("cmi.objectives"))
            .map(|index| {
                let base = format!("cmi.objectives.{}", index);
                let field = |name: &str| self.values.get(&format!("{}.{}", base, name)).cloned();
                let (completion_status, success_status) = match self.version {
                    ScormVersion::Scorm12 => (field("status"), None),
                    ScormVersion::Scorm2004 => (field("completion_status"), field("success_status")),
                };
                ObjectiveRecord {
                    index,
                    id: field("id"),
                    score_raw: field("score.raw"),
                    score_min: field("score.min"),
                    score_max: field("score.max"),
                    score_scaled: field("score.scaled"),
                    completion_status,
                    success_status,
                }
            })
            .collect()
    }

    // ========================================================================
    // Path resolution
    // ========================================================================

    fn resolve(&self, path: &str) -> Result<Resolved, DataModelError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() < 2 || segments[0] != "cmi" || segments.iter().any(|s| s.is_empty()) {
            return Err(DataModelError::Undefined(path.to_string()));
        }
        if !is_canonical(&segments) {
            return Err(DataModelError::Undefined(path.to_string()));
        }

        let leaf = segments[segments.len() - 1];
        let parent = &segments[..segments.len() - 1];
        let parent_pattern = normalize_segments(parent);

        match leaf {
            "_version" => {
                if parent_pattern == "cmi" {
                    return Ok(Resolved::Version);
                }
                return Err(DataModelError::Undefined(path.to_string()));
            }
            "_count" => {
                if self.schema.collection(&parent_pattern).is_some() {
                    self.check_parent_indices(path, parent)?;
                    return Ok(Resolved::Count { collection: parent.join(".") });
                }
                if self.schema.is_known(&parent_pattern) {
                    return Err(DataModelError::NotAnArray(path.to_string()));
                }
                return Err(DataModelError::Undefined(path.to_string()));
            }
            "_children" => {
                if let Some(collection) = self.schema.collection(&parent_pattern) {
                    return Ok(Resolved::Children(collection.children));
                }
                if let Some(group) = self.schema.group(&parent_pattern) {
                    return Ok(Resolved::Children(group.children));
                }
                if self.schema.element(&parent_pattern).is_some() {
                    return Err(DataModelError::NoChildren(path.to_string()));
                }
                return Err(DataModelError::Undefined(path.to_string()));
            }
            _ => {}
        }

        let pattern = normalize_segments(&segments);
        let def = self
            .schema
            .element(&pattern)
            .ok_or_else(|| DataModelError::Undefined(path.to_string()))?;

        let mut collections = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if let Some(index) = parse_index(segment) {
                let owner = segments[..i].join(".");
                let owner_pattern = normalize_segments(&segments[..i]);
                let collection_def = self
                    .schema
                    .collection(&owner_pattern)
                    .ok_or_else(|| DataModelError::Undefined(path.to_string()))?;
                collections.push(CollectionRef {
                    path: owner,
                    def: collection_def,
                    index,
                    field: segments[i + 1..].join("."),
                });
            }
        }
        Ok(Resolved::Element { def, collections })
    }

    /// `cmi.interactions.5.objectives._count` requires interaction 5 to exist
    fn check_parent_indices(&self, path: &str, parent: &[&str]) -> Result<(), DataModelError> {
        for (i, segment) in parent.iter().enumerate() {
            if let Some(index) = parse_index(segment) {
                let owner = parent[..i].join(".");
                let count = self.count(&owner);
                if index >= count {
                    return Err(DataModelError::IndexOutOfRange {
                        path: path.to_string(),
                        index,
                        count,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Replace numeric segments with `n`
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    normalize_segments(&segments)
}

fn normalize_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| if is_index(s) { "n" } else { s })
        .collect::<Vec<_>>()
        .join(".")
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Index value of a numeric segment
///
/// Only plain decimal that fits in `usize` is an index: `00`, `07` and
/// digit runs past `usize::MAX` are not.
fn parse_index(segment: &str) -> Option<usize> {
    if !is_index(segment) || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    segment.parse().ok()
}

/// Every numeric segment is a usable index, so one element has one key
fn is_canonical(segments: &[&str]) -> bool {
    segments.iter().all(|s| !is_index(s) || parse_index(s).is_some())
}

/// Fill a pattern's `n` segments with the indices of `collections`
fn instantiate(pattern: &str, collections: &[CollectionRef]) -> String {
    let mut indices = collections.iter().map(|c| c.index);
    pattern
        .split('.')
        .map(|s| {
            if s == "n" {
                indices.next().map(|i| i.to_string()).unwrap_or_else(|| s.to_string())
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

// ============================================================================
// Typed records
// ============================================================================

/// Snapshot of one `cmi.interactions.n` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub index: usize,
    pub id: Option<String>,
    pub interaction_type: Option<String>,
    pub learner_response: Option<String>,
    pub correct_responses: Vec<String>,
    pub result: Option<String>,
    pub latency: Option<String>,
    pub timestamp: Option<String>,
    pub weighting: Option<String>,
    pub description: Option<String>,
    pub objective_ids: Vec<String>,
}

/// Snapshot of one `cmi.objectives.n` record
///
/// SCORM 1.2 has a single `status`, reported as `completion_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    pub index: usize,
    pub id: Option<String>,
    pub score_raw: Option<String>,
    pub score_min: Option<String>,
    pub score_max: Option<String>,
    pub score_scaled: Option<String>,
    pub completion_status: Option<String>,
    pub success_status: Option<String>,
}
