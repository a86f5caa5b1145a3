//! Heuristic quiz extraction
//!
//! SCO pages rarely mark up their questions in a machine-readable way, so
//! extraction works on the raw HTML:
//!
//! ```text
//! <p>Which planet is largest?</p>                 ──► prompt
//! <label><input type="radio" name="q1"> Mars</label>    ──► option
//! <input type="radio" name="q1" checked> Jupiter<br>    ──► option, answer
//! ```
//!
//! A prompt is the nearest preceding text ending in `?`. Options are the
//! radio/checkbox labels after it in document order, grouped by input name.
//! The answer is the option carrying `checked` or `data-correct`; without
//! one the first option is used and the item is marked inferred.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

use super::schema::QuizItem;

/// Options kept per question
pub const MAX_OPTIONS: usize = 4;

/// Lower-cased markers that, next to a choice input, make a page a quiz
pub const QUIZ_KEYWORDS: &[&str] = &[
    "question",
    "quiz",
    "answer",
    "test",
    "select all",
    "choose the",
    "which of",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "table", "form", "fieldset", "legend", "section", "article", "dt", "dd", "hr",
];

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->|<label\b([^>]*)>(.*?)</label\s*>|<input\b([^>]*)>|</?([a-zA-Z][a-zA-Z0-9]*)[^>]*>|[^<]+",
    )
    .expect("valid token regex")
});
static INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("valid input regex"));
static CHOICE_INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<input\b[^>]*\btype\s*=\s*["']?(radio|checkbox)\b"#)
        .expect("valid choice regex")
});
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("valid attribute regex")
});
static STRIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->|<[^>]*>")
        .expect("valid strip regex")
});
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").expect("valid entity regex")
});
static QUESTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w[^.!?]*\?").expect("valid question regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Every question had options and a marked answer
    High,
    /// Some answer keys were inferred or some prompts had no options
    Low,
}

/// Result of [`extract_quiz`]
#[derive(Debug, Clone, PartialEq)]
pub struct QuizExtraction {
    pub items: Vec<QuizItem>,
    /// Question-marked text that no options followed
    pub orphan_prompts: Vec<String>,
}

impl QuizExtraction {
    pub fn confidence(&self) -> Confidence {
        if self.orphan_prompts.is_empty() && self.items.iter().all(|i| !i.answer_key_inferred) {
            Confidence::High
        } else {
            Confidence::Low
        }
    }
}

/// Radio/checkbox inputs plus a quiz keyword or a question-marked sentence
pub fn looks_like_quiz(html: &str) -> bool {
    if !CHOICE_INPUT_RE.is_match(html) {
        return false;
    }
    let text = visible_text(html).to_lowercase();
    QUIZ_KEYWORDS.iter().any(|k| text.contains(k)) || QUESTION_RE.is_match(&text)
}

/// Extract one item per question; ids are `{id_prefix}-q{n}`
pub fn extract_quiz(html: &str, id_prefix: &str) -> QuizExtraction {
    let mut drafts: Vec<Draft> = Vec::new();
    let mut orphan_prompts = Vec::new();
    let mut prompt: Option<String> = None;
    let mut last_text: Option<String> = None;

    for event in tokenize(html) {
        match event {
            Event::Text(text) => {
                if text.ends_with('?') {
                    if let Some(previous) = prompt.replace(text.clone()) {
                        orphan_prompts.push(previous);
                    }
                }
                last_text = Some(text);
            }
            Event::Choice(choice) => {
                let continues = prompt.is_none()
                    && drafts.last().map(|d| d.group == choice.group).unwrap_or(false);
                if !continues {
                    let number = drafts.len() + 1;
                    drafts.push(Draft {
                        prompt: prompt
                            .take()
                            .or_else(|| last_text.take())
                            .unwrap_or_else(|| format!("Question {}", number)),
                        group: choice.group.clone(),
                        options: Vec::new(),
                    });
                }
                last_text = None;
                if let Some(draft) = drafts.last_mut() {
                    if draft.options.len() < MAX_OPTIONS {
                        draft.options.push(choice);
                    }
                }
            }
        }
    }
    orphan_prompts.extend(prompt);

    let items = drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| draft.into_item(format!("{}-q{}", id_prefix, i + 1)))
        .collect();

    QuizExtraction {
        items,
        orphan_prompts,
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Choice {
    group: Option<String>,
    label: String,
    /// `value` attribute, used when no label text is found
    value: String,
    marked: bool,
}

#[derive(Debug)]
enum Event {
    Text(String),
    Choice(Choice),
}

struct Draft {
    prompt: String,
    group: Option<String>,
    options: Vec<Choice>,
}

impl Draft {
    fn into_item(self, id: String) -> QuizItem {
        let marked = self.options.iter().position(|o| o.marked);
        let answer_index = marked.unwrap_or(0);
        QuizItem {
            id,
            prompt: self.prompt,
            answer: self
                .options
                .get(answer_index)
                .map(|o| o.label.clone())
                .unwrap_or_default(),
            answer_index,
            answer_key_inferred: marked.is_none(),
            options: self.options.into_iter().map(|o| o.label).collect(),
            points: 1,
        }
    }
}

/// Text lines and choice inputs in document order
fn tokenize(html: &str) -> Vec<Event> {
    let for_labels = labels_by_target(html);
    let mut events = Vec::new();
    let mut line = String::new();
    // choice waiting for the text that follows it
    let mut pending: Option<Choice> = None;

    let flush = |line: &mut String, pending: &mut Option<Choice>, events: &mut Vec<Event>| {
        let text = clean_text(line);
        line.clear();
        if text.is_empty() {
            return;
        }
        match pending.take() {
            Some(mut choice) => {
                choice.label = text;
                events.push(Event::Choice(choice));
            }
            None => events.push(Event::Text(text)),
        }
    };

    for caps in TOKEN_RE.captures_iter(html) {
        let token = &caps[0];
        if let Some(inner) = caps.get(2) {
            // <label>...</label>
            let label_attrs = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if attribute(label_attrs, "for").is_some() && !INPUT_RE.is_match(inner.as_str()) {
                continue;
            }
            flush(&mut line, &mut pending, &mut events);
            emit_pending(&mut pending, &mut events);
            if let Some(input) = INPUT_RE.captures(inner.as_str()) {
                if let Some(mut choice) = choice_input(&input[1], &for_labels) {
                    let text = clean_text(&STRIP_RE.replace_all(inner.as_str(), " "));
                    if !text.is_empty() {
                        choice.label = text;
                        events.push(Event::Choice(choice));
                    } else {
                        pending = Some(choice);
                        emit_pending(&mut pending, &mut events);
                    }
                }
            } else {
                line.push_str(&STRIP_RE.replace_all(inner.as_str(), " "));
                flush(&mut line, &mut pending, &mut events);
            }
        } else if let Some(attrs) = caps.get(3) {
            // <input ...>
            if let Some(choice) = choice_input(attrs.as_str(), &for_labels) {
                flush(&mut line, &mut pending, &mut events);
                emit_pending(&mut pending, &mut events);
                if choice.label.is_empty() {
                    pending = Some(choice);
                } else {
                    events.push(Event::Choice(choice));
                }
            }
        } else if let Some(tag) = caps.get(4) {
            if BLOCK_TAGS.contains(&tag.as_str().to_ascii_lowercase().as_str()) {
                flush(&mut line, &mut pending, &mut events);
            }
        } else if !token.starts_with('<') {
            line.push_str(token);
        }
    }
    flush(&mut line, &mut pending, &mut events);
    emit_pending(&mut pending, &mut events);
    events
}

/// A pending choice that never got text falls back to its `value`
fn emit_pending(pending: &mut Option<Choice>, events: &mut Vec<Event>) {
    if let Some(mut choice) = pending.take() {
        if !choice.value.is_empty() {
            choice.label = std::mem::take(&mut choice.value);
            events.push(Event::Choice(choice));
        }
    }
}

fn choice_input(attrs: &str, for_labels: &HashMap<String, String>) -> Option<Choice> {
    let kind = attribute(attrs, "type")?.to_ascii_lowercase();
    if kind != "radio" && kind != "checkbox" {
        return None;
    }
    let marked = ["checked", "data-correct"].iter().any(|name| {
        attribute(attrs, name)
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(false)
    });
    Some(Choice {
        group: attribute(attrs, "name").filter(|n| !n.is_empty()),
        label: attribute(attrs, "id")
            .and_then(|id| for_labels.get(&id).cloned())
            .unwrap_or_default(),
        value: attribute(attrs, "value").map(|v| clean_text(&v)).unwrap_or_default(),
        marked,
    })
}

/// `<label for="...">` text keyed by the input id it names
fn labels_by_target(html: &str) -> HashMap<String, String> {
    TOKEN_RE
        .captures_iter(html)
        .filter_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            let inner = caps.get(2)?.as_str();
            let target = attribute(attrs, "for")?;
            let text = clean_text(&STRIP_RE.replace_all(inner, " "));
            (!text.is_empty()).then_some((target, text))
        })
        .collect()
}

/// Attribute value by name; a bare attribute yields `""`
fn attribute(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| decode_entities(m.as_str()))
            .unwrap_or_default();
        Some(value)
    })
}

fn visible_text(html: &str) -> String {
    clean_text(&STRIP_RE.replace_all(html, " "))
}

/// Decode entities and collapse whitespace
fn clean_text(text: &str) -> String {
    decode_entities(text).split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
