//! Native course schema
//!
//! Course → Module → Lesson → Block. Field order is fixed and every
//! collection is a `Vec`, so serializing the same course twice yields the
//! same bytes.

use serde::{Deserialize, Serialize};

use crate::cmi::ScormVersion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub title: String,
    pub slug: String,
    pub summary: String,
    /// `sha256-<hex>` of the imported archive
    pub source_package_id: String,
    pub scorm_version: ScormVersion,
    pub modules: Vec<Module>,
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub title: String,
    pub order: usize,
    /// Manifest item the module came from, absent for the organization module
    pub source_item: Option<String>,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub order: usize,
    pub source_item: String,
    /// Archive path of the SCO launch file
    pub launch_href: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Block {
    RichText { html: String },
    Quiz { items: Vec<QuizItem> },
}

impl Block {
    pub fn kind(&self) -> &'static str {
        match self {
            Block::RichText { .. } => "rich-text",
            Block::Quiz { .. } => "quiz",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItem {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub answer: String,
    pub answer_index: usize,
    /// No option carried a `checked` or `data-correct` marker
    pub answer_key_inferred: bool,
    pub points: u32,
}

impl Course {
    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.modules.iter().flat_map(|m| m.lessons.iter())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
