//! `imsmanifest.xml` parser
//!
//! Matching is done on local names only, so `imscp:item`, `item` and
//! `adlcp:masteryscore` / `adlcp:masteryScore` all resolve the same way
//! regardless of which namespace prefixes a packaging tool chose.

use roxmltree::{Document, Node, ParsingOptions};
use serde::Serialize;

use super::ImportError;
use crate::cmi::ScormVersion;
use crate::rte::LaunchRequest;

/// Parsed manifest
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub identifier: String,
    pub title: String,
    pub version: ScormVersion,
    /// `false` when neither `schemaversion` nor namespaces identified the version
    pub version_detected: bool,
    /// `default` attribute of `<organizations>`
    pub default_organization: Option<String>,
    pub organizations: Vec<Organization>,
    pub resources: Vec<Resource>,
    /// `xml:base` of `<resources>`
    pub resources_base: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub identifier: String,
    pub title: String,
    pub items: Vec<Item>,
}

/// One node of the activity tree
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub identifier: String,
    pub title: String,
    pub identifierref: Option<String>,
    pub parameters: Option<String>,
    pub is_visible: bool,
    /// 1.2 `masteryscore` or 2004 `minNormalizedMeasure`
    pub mastery_score: Option<String>,
    pub data_from_lms: Option<String>,
    pub max_time_allowed: Option<String>,
    pub time_limit_action: Option<String>,
    pub children: Vec<Item>,
}

impl Item {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Launch values the manifest contributes to this item's sessions
    pub fn launch_request(&self, package_id: &str, version: ScormVersion) -> LaunchRequest {
        LaunchRequest {
            package_id: package_id.to_string(),
            sco_id: self.identifier.clone(),
            version: version.as_str().to_string(),
            launch_data: self.data_from_lms.clone(),
            mastery_score: self.mastery_score.clone(),
            max_time_allowed: self.max_time_allowed.clone(),
            time_limit_action: self.time_limit_action.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub identifier: String,
    pub resource_type: String,
    /// `sco` or `asset`
    pub scorm_type: Option<String>,
    pub href: Option<String>,
    pub base: Option<String>,
    pub files: Vec<String>,
    pub dependencies: Vec<String>,
}

impl Resource {
    /// Archive path of the launch file: `xml:base` joined, query and fragment removed
    pub fn launch_path(&self, resources_base: Option<&str>) -> Option<String> {
        let href = self.href.as_deref()?;
        let href = href.split(['?', '#']).next().unwrap_or(href);
        if href.is_empty() {
            return None;
        }
        let mut path = String::new();
        for base in [resources_base, self.base.as_deref()].into_iter().flatten() {
            path.push_str(base.trim_start_matches("./"));
            if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
        }
        path.push_str(href.trim_start_matches("./"));
        Some(path.trim_start_matches('/').to_string())
    }
}

impl Manifest {
    pub fn parse(xml: &str) -> Result<Manifest, ImportError> {
        let xml = xml.trim_start_matches('\u{feff}');
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(xml, options)
            .map_err(|e| ImportError::MalformedManifest(e.to_string()))?;

        let root = doc.root_element();
        if !root.tag_name().name().eq_ignore_ascii_case("manifest") {
            return Err(ImportError::MalformedManifest(format!(
                "root element is <{}>, expected <manifest>",
                root.tag_name().name()
            )));
        }

        let (version, version_detected) = detect_version(root);

        let organizations_node = child(root, "organizations");
        let organizations: Vec<Organization> = organizations_node
            .map(|node| {
                children(node, "organization")
                    .enumerate()
                    .map(|(i, org)| Organization {
                        identifier: attr(org, "identifier")
                            .unwrap_or_else(|| format!("org_{}", i)),
                        title: child_text(org, "title")
                            .unwrap_or_else(|| format!("Organization {}", i + 1)),
                        items: parse_items(org, 0),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let default_organization = organizations_node
            .and_then(|node| attr(node, "default"))
            .filter(|id| !id.is_empty());

        let resources_node = child(root, "resources");
        let resources = resources_node
            .map(|node| children(node, "resource").map(parse_resource).collect())
            .unwrap_or_default();
        let resources_base = resources_node.and_then(|node| attr(node, "base"));

        let identifier = attr(root, "identifier").unwrap_or_else(|| "unknown".to_string());
        let title = metadata_title(root)
            .or_else(|| {
                default_organization
                    .as_deref()
                    .and_then(|id| organizations.iter().find(|o| o.identifier == id))
                    .or_else(|| organizations.first())
                    .map(|o| o.title.clone())
            })
            .unwrap_or_else(|| identifier.clone());

        Ok(Manifest {
            identifier,
            title,
            version,
            version_detected,
            default_organization,
            organizations,
            resources,
            resources_base,
        })
    }

    pub fn resource(&self, identifier: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.identifier == identifier)
    }

    /// Organization named by `default`, else the first
    pub fn default_organization(&self) -> Option<&Organization> {
        self.default_organization
            .as_deref()
            .and_then(|id| self.organizations.iter().find(|o| o.identifier == id))
            .or_else(|| self.organizations.first())
    }

    /// Launch file of an item's resource, if it references one
    pub fn launch_path(&self, item: &Item) -> Option<String> {
        let resource = self.resource(item.identifierref.as_deref()?)?;
        resource.launch_path(self.resources_base.as_deref())
    }
}

// ============================================================================
// Element helpers
// ============================================================================

fn is(node: &Node, local: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(local)
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    local: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| is(n, local))
}

fn child<'a, 'input>(node: Node<'a, 'input>, local: &'static str) -> Option<Node<'a, 'input>> {
    children(node, local).next()
}

fn descendant<'a, 'input>(node: Node<'a, 'input>, local: &'static str) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| is(n, local))
}

/// Attribute by local name, ignoring prefix and case
fn attr(node: Node, local: &str) -> Option<String> {
    node.attributes()
        .find(|a| a.name().eq_ignore_ascii_case(local))
        .map(|a| a.value().trim().to_string())
}

fn text_of(node: Node) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn child_text(node: Node, local: &'static str) -> Option<String> {
    child(node, local).and_then(text_of)
}

// ============================================================================
// Sections
// ============================================================================

fn parse_items(parent: Node, depth: usize) -> Vec<Item> {
    children(parent, "item")
        .enumerate()
        .map(|(i, node)| {
            let sequencing = child(node, "sequencing");
            let mastery_score = child_text(node, "masteryscore").or_else(|| {
                sequencing
                    .and_then(|s| descendant(s, "minNormalizedMeasure"))
                    .and_then(text_of)
            });
            let max_time_allowed = child_text(node, "maxtimeallowed").or_else(|| {
                sequencing
                    .and_then(|s| descendant(s, "limitConditions"))
                    .and_then(|n| attr(n, "attemptAbsoluteDurationLimit"))
            });
            Item {
                identifier: attr(node, "identifier")
                    .unwrap_or_else(|| format!("item_{}_{}", depth, i)),
                title: child_text(node, "title").unwrap_or_else(|| format!("Item {}", i + 1)),
                identifierref: attr(node, "identifierref").filter(|r| !r.is_empty()),
                parameters: attr(node, "parameters"),
                is_visible: attr(node, "isvisible").map(|v| v != "false").unwrap_or(true),
                mastery_score,
                data_from_lms: child_text(node, "datafromlms"),
                max_time_allowed,
                time_limit_action: child_text(node, "timelimitaction"),
                children: parse_items(node, depth + 1),
            }
        })
        .collect()
}

fn parse_resource(node: Node) -> Resource {
    Resource {
        identifier: attr(node, "identifier").unwrap_or_default(),
        resource_type: attr(node, "type").unwrap_or_else(|| "webcontent".to_string()),
        scorm_type: attr(node, "scormtype").map(|t| t.to_ascii_lowercase()),
        href: attr(node, "href").filter(|h| !h.is_empty()),
        base: attr(node, "base").filter(|b| !b.is_empty()),
        files: children(node, "file").filter_map(|f| attr(f, "href")).collect(),
        dependencies: children(node, "dependency")
            .filter_map(|d| attr(d, "identifierref"))
            .collect(),
    }
}

fn metadata_title(root: Node) -> Option<String> {
    let metadata = child(root, "metadata")?;
    let general = descendant(metadata, "general")?;
    child(general, "title").and_then(text_of)
}

/// Version from `<schemaversion>`, then namespaces and schema locations
fn detect_version(root: Node) -> (ScormVersion, bool) {
    if let Some(label) = child(root, "metadata").and_then(|m| child_text(m, "schemaversion")) {
        if let Some(version) = ScormVersion::parse(&label) {
            return (version, true);
        }
    }

    let mut hints: Vec<String> = root
        .descendants()
        .filter(|n| n.is_element())
        .flat_map(|n| n.namespaces().map(|ns| ns.uri().to_ascii_lowercase()).collect::<Vec<_>>())
        .collect();
    if let Some(location) = attr(root, "schemaLocation") {
        hints.push(location.to_ascii_lowercase());
    }

    if hints
        .iter()
        .any(|h| h.contains("imsss") || h.contains("adlcp_v1p3") || h.contains("2004"))
    {
        (ScormVersion::Scorm2004, true)
    } else if hints
        .iter()
        .any(|h| h.contains("adlcp_rootv1p2") || h.contains("imscp_rootv1p1p2"))
    {
        (ScormVersion::Scorm12, true)
    } else {
        (ScormVersion::Scorm12, false)
    }
}
