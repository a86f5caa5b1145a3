//! HTML allow-list sanitizing
//!
//! [`sanitize`] runs lesson HTML through ammonia with a fixed allow-list and
//! reports what it dropped, so the converter can flag the draft.

use ammonia::Builder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};

pub const ALLOWED_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "br", "strong", "em", "b", "i", "u", "ol", "ul", "li",
    "a", "img", "div", "span",
];

pub const GENERIC_ATTRIBUTES: &[&str] = &["title", "class", "id"];

/// Document scaffolding that is unwrapped without being reported
const DOCUMENT_TAGS: &[&str] = &["html", "head", "body", "title", "meta", "link"];

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid script regex")
});
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid style regex"));
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").expect("valid tag regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*(?:=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?"#)
        .expect("valid attribute regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub html: String,
    /// Sorted, e.g. `<script>`, `<input>`, `a@onclick`, `p@style`
    pub removed: Vec<String>,
}

impl Sanitized {
    pub fn stripped(&self) -> bool {
        !self.removed.is_empty()
    }
}

fn sanitizer() -> Builder<'static> {
    let tag_attributes = HashMap::from([
        ("a", HashSet::from(["href"])),
        ("img", HashSet::from(["src", "alt"])),
    ]);
    let mut builder = Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .tag_attributes(tag_attributes)
        .generic_attributes(GENERIC_ATTRIBUTES.iter().copied().collect())
        .clean_content_tags(HashSet::from(["script", "style", "title"]));
    builder
}

pub fn sanitize(html: &str) -> Sanitized {
    let cleaned = sanitizer().clean(html).to_string();
    Sanitized {
        html: cleaned.trim().to_string(),
        removed: removed_markup(html).into_iter().collect(),
    }
}

/// Tags and attributes the allow-list does not keep
fn removed_markup(html: &str) -> BTreeSet<String> {
    let mut removed = BTreeSet::new();
    let html = SCRIPT_RE.replace_all(html, "<script>");
    let html = STYLE_RE.replace_all(&html, "<style>");

    for caps in TAG_RE.captures_iter(&html) {
        let tag = caps[1].to_ascii_lowercase();
        if DOCUMENT_TAGS.contains(&tag.as_str()) {
            continue;
        }
        if !ALLOWED_TAGS.contains(&tag.as_str()) {
            removed.insert(format!("<{}>", tag));
            continue;
        }
        let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        for attr in ATTR_RE.captures_iter(attrs) {
            let name = attr[1].to_ascii_lowercase();
            if !attribute_allowed(&tag, &name) {
                removed.insert(format!("{}@{}", tag, name));
            }
        }
    }
    removed
}

fn attribute_allowed(tag: &str, attr: &str) -> bool {
    GENERIC_ATTRIBUTES.contains(&attr)
        || matches!((tag, attr), ("a", "href") | ("img", "src") | ("img", "alt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_markup_is_kept() {
        let out = sanitize(r#"<h2 id="intro">Intro</h2><p class="lead">Read <em>this</em>.</p><img src="a.png" alt="A">"#);
        assert!(out.html.contains(r#"<h2 id="intro">Intro</h2>"#));
        assert!(out.html.contains(r#"<p class="lead">Read <em>this</em>.</p>"#));
        assert!(out.html.contains(r#"alt="A""#));
        assert!(!out.stripped());
    }

    #[test]
    fn test_scripts_and_handlers_are_removed() {
        let out = sanitize(
            r#"<p style="color:red" onclick="x()">Hi</p><script>if (a<b) alert(1)</script><a href="https://example.com" onmouseover="y()">link</a>"#,
        );
        assert!(!out.html.contains("script"));
        assert!(!out.html.contains("alert"));
        assert!(!out.html.contains("onclick"));
        assert!(!out.html.contains("style"));
        assert!(out.html.contains("Hi"));
        assert_eq!(
            out.removed,
            vec!["<script>", "a@onmouseover", "p@onclick", "p@style"]
        );
    }

    #[test]
    fn test_document_scaffolding_is_silent() {
        let out = sanitize(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Page</title></head><body><p>Body</p></body></html>",
        );
        assert_eq!(out.html, "<p>Body</p>");
        assert!(out.removed.is_empty());
    }

    #[test]
    fn test_form_controls_are_reported() {
        let out = sanitize(r#"<form><input type="radio" name="q1"> Yes</form>"#);
        assert!(out.html.contains("Yes"));
        assert_eq!(out.removed, vec!["<form>", "<input>"]);
    }
}
