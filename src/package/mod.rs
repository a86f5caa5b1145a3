//! Package Importer
//!
//! Turns uploaded ZIP bytes into a validated [`ScormPackage`]: the archive
//! entries, the parsed manifest and the content-addressed package id.
//! Building native course objects is the converter's job.
//!
//! ## Architecture
//!
//! ```text
//! ZIP bytes ──► extract_archive ──► imsmanifest.xml ──► Manifest::parse
//!     │                                                      │
//!     └── sha256-<hex> package id                            ▼
//!                                         validate references and launch files
//!                                                            │
//!                                                            ▼
//!                                         ScormPackage { manifest, files, warnings }
//! ```

pub mod manifest;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::{info, warn};

use crate::cmi::ScormVersion;

pub use manifest::{Item, Manifest, Organization, Resource};

pub const MANIFEST_FILE: &str = "imsmanifest.xml";

/// Decompressed size allowed for a whole archive unless the caller picks one
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 1024 * 1024 * 1024;

// ============================================================================
// Errors and warnings
// ============================================================================

/// Fatal import problem
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportError {
    #[error("Archive could not be read: {message}")]
    UnreadableArchive { message: String },

    #[error("imsmanifest.xml not found at the archive root")]
    MissingManifest,

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Manifest declares no organization")]
    NoOrganization,

    #[error("Item '{item}' references undeclared resource '{identifierref}'")]
    UnresolvedReference { item: String, identifierref: String },

    #[error("Resource '{resource}' has no launch file")]
    NoLaunchFile { resource: String },

    #[error("Resource '{resource}' launch file '{path}' is not in the archive")]
    MissingFile { resource: String, path: String },
}

/// Non-fatal finding attached to the draft
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportWarning {
    /// No schemaversion or namespace identified the SCORM version
    VersionAssumed { version: ScormVersion },
    /// Organization other than the default, not converted
    DiscardedOrganization { identifier: String, title: String },
    /// Leaf item without a resource, nothing to convert
    EmptyItem { item: String, title: String },
    /// Launch file is not HTML, lesson left empty
    UnsupportedContent { item: String, path: String },
    /// Sanitizer removed tags or attributes
    ContentStripped { item: String, removed: Vec<String> },
    /// Quiz-like content with a question that has no options
    QuizWithoutOptions { item: String, prompt: Option<String> },
    /// No option was marked correct, the first one was used
    AnswerKeyInferred { item: String, prompt: String },
}

impl ImportWarning {
    pub fn message(&self) -> String {
        match self {
            ImportWarning::VersionAssumed { version } => {
                format!("SCORM version not declared, assuming {}", version)
            }
            ImportWarning::DiscardedOrganization { identifier, title } => {
                format!("Organization '{}' ({}) was not imported", title, identifier)
            }
            ImportWarning::EmptyItem { item, title } => {
                format!("Item '{}' ({}) has no content", title, item)
            }
            ImportWarning::UnsupportedContent { item, path } => {
                format!("Item '{}' launches non-HTML content '{}'", item, path)
            }
            ImportWarning::ContentStripped { item, removed } => {
                format!("Item '{}': removed {}", item, removed.join(", "))
            }
            ImportWarning::QuizWithoutOptions { item, prompt } => match prompt {
                Some(prompt) => format!("Item '{}': question '{}' has no options", item, prompt),
                None => format!("Item '{}' looks like a quiz but no options were found", item),
            },
            ImportWarning::AnswerKeyInferred { item, prompt } => {
                format!("Item '{}': answer to '{}' was inferred", item, prompt)
            }
        }
    }
}

/// Every fatal error found before the import was abandoned
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("Import failed with {} error(s)", errors.len())]
pub struct ImportFailure {
    pub errors: Vec<ImportError>,
}

impl From<ImportError> for ImportFailure {
    fn from(error: ImportError) -> Self {
        Self { errors: vec![error] }
    }
}

impl ImportFailure {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

// ============================================================================
// Importer
// ============================================================================

/// Validated package, ready for conversion
#[derive(Debug, Clone)]
pub struct ScormPackage {
    pub package_id: String,
    pub manifest: Manifest,
    pub files: BTreeMap<String, Vec<u8>>,
    pub warnings: Vec<ImportWarning>,
}

impl ScormPackage {
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

/// Content-addressed id of a package archive
pub fn compute_package_id(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("sha256-{}", hex::encode(result))
}

/// Extract all file entries, normalizing leading slashes
///
/// Entries are read against a shared budget of `max_extracted_bytes`, so
/// neither one entry nor the sum may decompress past it, whatever sizes
/// the central directory claims.
pub fn extract_archive(
    data: &[u8],
    max_extracted_bytes: u64,
) -> Result<BTreeMap<String, Vec<u8>>, ImportError> {
    let unreadable = |e: &dyn std::fmt::Display| ImportError::UnreadableArchive {
        message: e.to_string(),
    };

    let reader = Cursor::new(data);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| unreadable(&e))?;
    let mut files = BTreeMap::new();
    let mut remaining = max_extracted_bytes;
    let over_budget = || ImportError::UnreadableArchive {
        message: format!("Archive expands beyond {} bytes", max_extracted_bytes),
    };

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| unreadable(&e))?;
        if file.is_file() {
            let name = file.name().replace('\\', "/");
            let normalized = name.trim_start_matches('/').to_string();
            if !normalized.is_empty() {
                if file.size() > remaining {
                    return Err(over_budget());
                }
                let mut contents = Vec::new();
                // one byte past the budget separates an exact fit from an overrun
                let read = file
                    .by_ref()
                    .take(remaining.saturating_add(1))
                    .read_to_end(&mut contents)
                    .map_err(|e| unreadable(&e))? as u64;
                if read > remaining {
                    return Err(over_budget());
                }
                remaining -= read;
                files.insert(normalized, contents);
            }
        }
    }

    Ok(files)
}

/// Parse and validate an uploaded SCORM archive
pub fn import_archive(data: &[u8]) -> Result<ScormPackage, ImportFailure> {
    import_archive_with_limit(data, DEFAULT_MAX_EXTRACTED_BYTES)
}

/// [`import_archive`] with an explicit decompressed-size budget
pub fn import_archive_with_limit(
    data: &[u8],
    max_extracted_bytes: u64,
) -> Result<ScormPackage, ImportFailure> {
    let package_id = compute_package_id(data);
    let files = extract_archive(data, max_extracted_bytes)?;

    let manifest_bytes = files.get(MANIFEST_FILE).ok_or(ImportError::MissingManifest)?;
    let manifest = Manifest::parse(&String::from_utf8_lossy(manifest_bytes))?;

    if manifest.organizations.is_empty() {
        return Err(ImportError::NoOrganization.into());
    }

    let errors = validate(&manifest, &files);
    if !errors.is_empty() {
        warn!(package_id = %package_id, errors = errors.len(), "Package failed validation");
        return Err(ImportFailure { errors });
    }

    let mut warnings = Vec::new();
    if !manifest.version_detected {
        warnings.push(ImportWarning::VersionAssumed { version: manifest.version });
    }
    if let Some(default) = manifest.default_organization() {
        for org in &manifest.organizations {
            if org.identifier != default.identifier {
                warnings.push(ImportWarning::DiscardedOrganization {
                    identifier: org.identifier.clone(),
                    title: org.title.clone(),
                });
            }
        }
    }

    info!(
        package_id = %package_id,
        manifest = %manifest.identifier,
        version = %manifest.version,
        files = files.len(),
        organizations = manifest.organizations.len(),
        "Imported SCORM package"
    );

    Ok(ScormPackage {
        package_id,
        manifest,
        files,
        warnings,
    })
}

/// Every reference resolves and every referenced launch file exists
fn validate(manifest: &Manifest, files: &BTreeMap<String, Vec<u8>>) -> Vec<ImportError> {
    let mut errors = Vec::new();
    let mut stack: Vec<&Item> = manifest
        .organizations
        .iter()
        .flat_map(|o| o.items.iter())
        .rev()
        .collect();

    while let Some(item) = stack.pop() {
        stack.extend(item.children.iter().rev());
        let Some(identifierref) = item.identifierref.as_deref() else {
            continue;
        };
        let Some(resource) = manifest.resource(identifierref) else {
            errors.push(ImportError::UnresolvedReference {
                item: item.identifier.clone(),
                identifierref: identifierref.to_string(),
            });
            continue;
        };
        match resource.launch_path(manifest.resources_base.as_deref()) {
            None => errors.push(ImportError::NoLaunchFile {
                resource: resource.identifier.clone(),
            }),
            Some(path) if !files.contains_key(&path) => errors.push(ImportError::MissingFile {
                resource: resource.identifier.clone(),
                path,
            }),
            Some(_) => {}
        }
    }

    // shared resources are reached from several items; report each problem once
    let mut seen = BTreeSet::new();
    errors.retain(|e| seen.insert(e.to_string()));
    errors
}
