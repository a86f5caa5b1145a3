//! Native Converter
//!
//! Maps a validated [`ScormPackage`] onto the platform's course schema.
//!
//! ```text
//! organization                      Course
//! ├── item (leaf) ──────────┐       ├── Module "<organization title>"
//! ├── item (leaf) ──────────┤       │     ├── Lesson ── Block
//! ├── item ─────────────────┼──►    │     └── Lesson ── Block
//! │   ├── item (leaf)       │       └── Module "<item title>"
//! │   └── item (leaf)       │             ├── Lesson ── Block
//! ```
//!
//! Each non-leaf item becomes a module holding its direct leaf children.
//! Leaves sitting directly under the organization are gathered into one
//! module named after the organization, placed where the first of them
//! appears. [`convert`] is pure: same package and metadata, same bytes.

pub mod quiz;
pub mod sanitize;
pub mod schema;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::package::{
    import_archive_with_limit, ImportFailure, ImportWarning, Item, ScormPackage,
    DEFAULT_MAX_EXTRACTED_BYTES,
};

pub use quiz::{extract_quiz, looks_like_quiz, Confidence, QuizExtraction};
pub use sanitize::{sanitize, Sanitized};
pub use schema::{Block, Course, Lesson, Module, QuizItem};

const HTML_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

/// Course metadata supplied by the authoring tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub summary: String,
}

/// Successful import: a course draft plus everything worth a second look
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub course: Course,
    pub warnings: Vec<ImportWarning>,
    pub needs_review: bool,
}

/// Import a ZIP and convert it; nothing is produced on failure
pub fn import_package(data: &[u8], metadata: &CourseMetadata) -> Result<ImportOutcome, ImportFailure> {
    import_package_with_limit(data, metadata, DEFAULT_MAX_EXTRACTED_BYTES)
}

/// [`import_package`] with an explicit decompressed-size budget
pub fn import_package_with_limit(
    data: &[u8],
    metadata: &CourseMetadata,
    max_extracted_bytes: u64,
) -> Result<ImportOutcome, ImportFailure> {
    let package = import_archive_with_limit(data, max_extracted_bytes)?;
    Ok(convert(&package, metadata))
}

/// Convert a validated package into a course draft
pub fn convert(package: &ScormPackage, metadata: &CourseMetadata) -> ImportOutcome {
    let manifest = &package.manifest;
    let title = if metadata.title.trim().is_empty() {
        manifest.title.clone()
    } else {
        metadata.title.trim().to_string()
    };
    let slug = if metadata.slug.trim().is_empty() {
        slugify(&title)
    } else {
        slugify(&metadata.slug)
    };

    let mut converter = Converter {
        package,
        slug: &slug,
        modules: Vec::new(),
        warnings: package.warnings.clone(),
    };

    if let Some(organization) = manifest.default_organization() {
        let mut root_lessons: Option<(usize, Vec<Lesson>)> = None;
        for item in &organization.items {
            if item.is_leaf() {
                let (_, lessons) = root_lessons.get_or_insert_with(|| (converter.modules.len(), Vec::new()));
                if let Some(lesson) = converter.lesson(item, lessons.len()) {
                    lessons.push(lesson);
                }
            } else {
                converter.module_tree(item);
            }
        }
        if let Some((position, lessons)) = root_lessons.filter(|(_, l)| !l.is_empty()) {
            converter.modules.insert(
                position,
                Module {
                    id: String::new(),
                    title: organization.title.clone(),
                    order: 0,
                    source_item: None,
                    lessons,
                },
            );
        }
    }

    let Converter {
        mut modules,
        warnings,
        ..
    } = converter;
    for (order, module) in modules.iter_mut().enumerate() {
        module.order = order;
        module.id = format!("{}-m{}", slug, order + 1);
        for lesson in module.lessons.iter_mut() {
            let lesson_id = format!("{}-l{}", module.id, lesson.order + 1);
            for block in lesson.blocks.iter_mut() {
                if let Block::Quiz { items } = block {
                    for (i, item) in items.iter_mut().enumerate() {
                        item.id = format!("{}-q{}", lesson_id, i + 1);
                    }
                }
            }
            lesson.id = lesson_id;
        }
    }

    let needs_review = !warnings.is_empty();
    let course = Course {
        title,
        slug,
        summary: metadata.summary.trim().to_string(),
        source_package_id: package.package_id.clone(),
        scorm_version: manifest.version,
        modules,
        needs_review,
    };

    info!(
        package_id = %package.package_id,
        slug = %course.slug,
        modules = course.modules.len(),
        lessons = course.lesson_count(),
        warnings = warnings.len(),
        "Converted SCORM package"
    );

    ImportOutcome {
        course,
        warnings,
        needs_review,
    }
}

struct Converter<'a> {
    package: &'a ScormPackage,
    slug: &'a str,
    modules: Vec<Module>,
    warnings: Vec<ImportWarning>,
}

impl<'a> Converter<'a> {
    /// Pre-order: the item's module, then modules of its non-leaf children
    fn module_tree(&mut self, item: &Item) {
        let position = self.modules.len();
        let mut lessons = Vec::new();
        for child in item.children.iter().filter(|c| c.is_leaf()) {
            if let Some(lesson) = self.lesson(child, lessons.len()) {
                lessons.push(lesson);
            }
        }
        if !lessons.is_empty() {
            self.modules.insert(
                position,
                Module {
                    id: String::new(),
                    title: item.title.clone(),
                    order: 0,
                    source_item: Some(item.identifier.clone()),
                    lessons,
                },
            );
        }
        for child in item.children.iter().filter(|c| !c.is_leaf()) {
            self.module_tree(child);
        }
    }

    fn lesson(&mut self, item: &Item, order: usize) -> Option<Lesson> {
        let package = self.package;
        let Some(path) = package.manifest.launch_path(item) else {
            self.warnings.push(ImportWarning::EmptyItem {
                item: item.identifier.clone(),
                title: item.title.clone(),
            });
            return None;
        };

        let block = match package.file(&path) {
            Some(bytes) if is_html(&path) => self.block(item, &String::from_utf8_lossy(bytes)),
            _ => {
                self.warnings.push(ImportWarning::UnsupportedContent {
                    item: item.identifier.clone(),
                    path: path.clone(),
                });
                Block::RichText {
                    html: String::new(),
                }
            }
        };
        debug!(slug = %self.slug, item = %item.identifier, kind = block.kind(), "Converted item");

        Some(Lesson {
            id: String::new(),
            title: item.title.clone(),
            order,
            source_item: item.identifier.clone(),
            launch_href: path,
            blocks: vec![block],
        })
    }

    fn block(&mut self, item: &Item, html: &str) -> Block {
        if looks_like_quiz(html) {
            let extraction = extract_quiz(html, &item.identifier);
            debug!(
                item = %item.identifier,
                questions = extraction.items.len(),
                confidence = ?extraction.confidence(),
                "Extracted quiz"
            );
            for prompt in &extraction.orphan_prompts {
                self.warnings.push(ImportWarning::QuizWithoutOptions {
                    item: item.identifier.clone(),
                    prompt: Some(prompt.clone()),
                });
            }
            if !extraction.items.is_empty() {
                for quiz_item in extraction.items.iter().filter(|q| q.answer_key_inferred) {
                    self.warnings.push(ImportWarning::AnswerKeyInferred {
                        item: item.identifier.clone(),
                        prompt: quiz_item.prompt.clone(),
                    });
                }
                return Block::Quiz {
                    items: extraction.items,
                };
            }
            self.warnings.push(ImportWarning::QuizWithoutOptions {
                item: item.identifier.clone(),
                prompt: None,
            });
        }

        let sanitized = sanitize(html);
        if sanitized.stripped() {
            self.warnings.push(ImportWarning::ContentStripped {
                item: item.identifier.clone(),
                removed: sanitized.removed,
            });
        }
        Block::RichText {
            html: sanitized.html,
        }
    }
}

fn is_html(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| HTML_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Lower-case ASCII alphanumerics separated by single dashes
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "course".to_string()
    } else {
        slug
    }
}
