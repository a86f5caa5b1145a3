//! Integration tests for SCORM package import and course conversion

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use elohim_scorm::{
    import_package, import_package_with_limit, Block, CourseMetadata, ImportError, ImportWarning,
    ScormVersion,
};

/// Build a ZIP archive in memory
fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, body) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

const SAFETY_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="com.example.safety" version="1.0"
    xmlns="http://www.imsproject.org/xsd/imscp_rootv1p1p2"
    xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_rootv1p2">
  <metadata>
    <schema>ADL SCORM</schema>
    <schemaversion>1.2</schemaversion>
  </metadata>
  <organizations default="safety-org">
    <organization identifier="safety-org">
      <title>Workshop Safety</title>
      <item identifier="item-intro" identifierref="res-intro">
        <title>Welcome</title>
      </item>
      <item identifier="item-tools" identifierref="res-tools">
        <title>Hand Tools</title>
      </item>
      <item identifier="item-quiz" identifierref="res-quiz">
        <title>Check Your Understanding</title>
        <adlcp:masteryscore>80</adlcp:masteryscore>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="res-intro" type="webcontent" adlcp:scormtype="sco" href="intro.html">
      <file href="intro.html"/>
    </resource>
    <resource identifier="res-tools" type="webcontent" adlcp:scormtype="sco" href="tools.html">
      <file href="tools.html"/>
    </resource>
    <resource identifier="res-quiz" type="webcontent" adlcp:scormtype="sco" href="quiz.html">
      <file href="quiz.html"/>
    </resource>
  </resources>
</manifest>"#;

const INTRO_HTML: &str = r#"<html><head><title>Welcome</title></head>
<body><h1>Welcome</h1><p>This course covers the basics of workshop safety.</p></body></html>"#;

const TOOLS_HTML: &str = r#"<html><head><script src="scorm_api.js"></script></head>
<body onload="LMSInitialize('')"><h2>Hand Tools</h2>
<p>Keep blades <strong>sharp</strong> and stored.</p></body></html>"#;

const QUIZ_HTML: &str = r#"<html><body>
<h2>Quiz</h2>
<p>Which tool should you use to tighten a bolt?</p>
<label><input type="radio" name="q1" value="a"> Hammer</label>
<label><input type="radio" name="q1" value="b" data-correct="true"> Wrench</label>
<label><input type="radio" name="q1" value="c"> Chisel</label>
<p>Should safety glasses be worn when grinding?</p>
<label><input type="radio" name="q2" value="yes" checked> Yes</label>
<label><input type="radio" name="q2" value="no"> No</label>
</body></html>"#;

fn safety_package() -> Vec<u8> {
    zip_of(&[
        ("imsmanifest.xml", SAFETY_MANIFEST),
        ("intro.html", INTRO_HTML),
        ("tools.html", TOOLS_HTML),
        ("quiz.html", QUIZ_HTML),
    ])
}

/// Three items become one module with three single-block lessons
#[test]
fn test_three_item_package() {
    let outcome = import_package(&safety_package(), &CourseMetadata::default()).unwrap();
    let course = &outcome.course;

    assert_eq!(course.title, "Workshop Safety");
    assert_eq!(course.slug, "workshop-safety");
    assert_eq!(course.scorm_version, ScormVersion::Scorm12);
    assert!(course.source_package_id.starts_with("sha256-"));

    assert_eq!(course.modules.len(), 1);
    let module = &course.modules[0];
    assert_eq!(module.title, "Workshop Safety");
    assert_eq!(module.lessons.len(), 3);
    assert!(module.lessons.iter().all(|l| l.blocks.len() == 1));

    let titles: Vec<&str> = module.lessons.iter().map(|l| l.title.as_str()).collect();
    assert_eq!(titles, vec!["Welcome", "Hand Tools", "Check Your Understanding"]);

    match &module.lessons[0].blocks[0] {
        Block::RichText { html } => {
            assert!(html.contains("<h1>Welcome</h1>"));
            assert!(!html.contains("<title>"));
        }
        other => panic!("expected rich text, got {:?}", other),
    }

    match &module.lessons[1].blocks[0] {
        Block::RichText { html } => {
            assert!(html.contains("<strong>sharp</strong>"));
            assert!(!html.contains("script"));
            assert!(!html.contains("onload"));
        }
        other => panic!("expected rich text, got {:?}", other),
    }

    match &module.lessons[2].blocks[0] {
        Block::Quiz { items } => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].id, "workshop-safety-m1-l3-q1");
            assert_eq!(items[0].prompt, "Which tool should you use to tighten a bolt?");
            assert_eq!(items[0].options, vec!["Hammer", "Wrench", "Chisel"]);
            assert_eq!(items[0].answer, "Wrench");
            assert_eq!(items[1].id, "workshop-safety-m1-l3-q2");
            assert_eq!(items[1].answer, "Yes");
            assert!(items.iter().all(|i| !i.answer_key_inferred));
        }
        other => panic!("expected quiz, got {:?}", other),
    }

    // Only the stripped script and handler need review
    assert_eq!(outcome.warnings.len(), 1);
    assert!(matches!(
        &outcome.warnings[0],
        ImportWarning::ContentStripped { item, .. } if item == "item-tools"
    ));
    assert!(outcome.needs_review);
}

/// Metadata from the caller overrides the manifest title
#[test]
fn test_metadata_overrides_title() {
    let metadata = CourseMetadata {
        title: "Shop Safety 101".to_string(),
        slug: String::new(),
        summary: "Mandatory for all new members".to_string(),
    };
    let outcome = import_package(&safety_package(), &metadata).unwrap();
    assert_eq!(outcome.course.title, "Shop Safety 101");
    assert_eq!(outcome.course.slug, "shop-safety-101");
    assert_eq!(outcome.course.summary, "Mandatory for all new members");
    assert_eq!(outcome.course.modules[0].id, "shop-safety-101-m1");
}

/// The same archive always produces byte-identical JSON
#[test]
fn test_conversion_is_deterministic() {
    let data = safety_package();
    let first = import_package(&data, &CourseMetadata::default()).unwrap();
    let second = import_package(&data, &CourseMetadata::default()).unwrap();

    let first_json = first.course.to_json().unwrap();
    assert_eq!(first_json, second.course.to_json().unwrap());
    assert_eq!(
        serde_json::to_string(&first.warnings).unwrap(),
        serde_json::to_string(&second.warnings).unwrap()
    );

    let value: serde_json::Value = serde_json::from_str(&first_json).unwrap();
    assert_eq!(value["scormVersion"], "1.2");
    assert_eq!(value["modules"][0]["lessons"][2]["blocks"][0]["type"], "quiz");
    assert_eq!(value["modules"][0]["lessons"][0]["blocks"][0]["type"], "rich-text");
}

/// Every broken reference is reported and no course is produced
#[test]
fn test_broken_references_are_fatal() {
    let manifest = r#"<manifest identifier="broken"><metadata><schemaversion>1.2</schemaversion></metadata>
      <organizations default="o"><organization identifier="o"><title>Broken</title>
        <item identifier="a" identifierref="res-a"><title>A</title></item>
        <item identifier="b" identifierref="res-missing"><title>B</title></item>
        <item identifier="c" identifierref="res-c"><title>C</title></item>
      </organization></organizations>
      <resources>
        <resource identifier="res-a" type="webcontent" href="a.html"/>
        <resource identifier="res-c" type="webcontent" href="gone.html"/>
      </resources></manifest>"#;
    let data = zip_of(&[("imsmanifest.xml", manifest), ("a.html", "<p>A</p>")]);

    let failure = import_package(&data, &CourseMetadata::default()).unwrap_err();
    assert_eq!(
        failure.errors,
        vec![
            ImportError::UnresolvedReference {
                item: "b".to_string(),
                identifierref: "res-missing".to_string(),
            },
            ImportError::MissingFile {
                resource: "res-c".to_string(),
                path: "gone.html".to_string(),
            },
        ]
    );
    assert_eq!(failure.messages().len(), 2);
}

#[test]
fn test_missing_manifest() {
    let data = zip_of(&[("index.html", "<p>Hello</p>")]);
    let failure = import_package(&data, &CourseMetadata::default()).unwrap_err();
    assert_eq!(failure.errors, vec![ImportError::MissingManifest]);
}

#[test]
fn test_not_a_zip() {
    let failure = import_package(b"definitely not a zip", &CourseMetadata::default()).unwrap_err();
    assert!(matches!(failure.errors[0], ImportError::UnreadableArchive { .. }));
}

/// Only the default organization is converted
#[test]
fn test_extra_organizations_are_discarded() {
    let manifest = r#"<manifest identifier="multi"><metadata><schemaversion>2004 4th Edition</schemaversion></metadata>
      <organizations default="main">
        <organization identifier="alt"><title>Alternate Path</title>
          <item identifier="alt-1" identifierref="r1"><title>Alt One</title></item>
        </organization>
        <organization identifier="main"><title>Main Path</title>
          <item identifier="main-1" identifierref="r1"><title>One</title></item>
          <item identifier="main-2" identifierref="r2"><title>Two</title></item>
        </organization>
      </organizations>
      <resources>
        <resource identifier="r1" type="webcontent" href="one.html"/>
        <resource identifier="r2" type="webcontent" href="two.html"/>
      </resources></manifest>"#;
    let data = zip_of(&[
        ("imsmanifest.xml", manifest),
        ("one.html", "<p>One</p>"),
        ("two.html", "<p>Two</p>"),
    ]);

    let outcome = import_package(&data, &CourseMetadata::default()).unwrap();
    assert_eq!(outcome.course.title, "Main Path");
    assert_eq!(outcome.course.scorm_version, ScormVersion::Scorm2004);
    assert_eq!(outcome.course.lesson_count(), 2);
    assert_eq!(
        outcome.warnings,
        vec![ImportWarning::DiscardedOrganization {
            identifier: "alt".to_string(),
            title: "Alternate Path".to_string(),
        }]
    );
    assert!(outcome.course.needs_review);
}

/// A manifest that never names its version is treated as 1.2 and flagged
#[test]
fn test_undeclared_version_is_flagged() {
    let manifest = r#"<manifest identifier="plain"><organizations><organization identifier="o"><title>Plain</title>
        <item identifier="i" identifierref="r"><title>Only</title></item>
      </organization></organizations>
      <resources><resource identifier="r" type="webcontent" href="only.html"/></resources></manifest>"#;
    let data = zip_of(&[("imsmanifest.xml", manifest), ("only.html", "<p>Only</p>")]);

    let outcome = import_package(&data, &CourseMetadata::default()).unwrap();
    assert_eq!(outcome.course.scorm_version, ScormVersion::Scorm12);
    assert_eq!(
        outcome.warnings,
        vec![ImportWarning::VersionAssumed { version: ScormVersion::Scorm12 }]
    );
}

/// A small archive that inflates past the budget is refused, not buffered
#[test]
fn test_decompressed_size_is_bounded() {
    let padding = " ".repeat(2 * 1024 * 1024);
    let intro = format!("{}{}", INTRO_HTML, padding);
    let data = zip_of(&[
        ("imsmanifest.xml", SAFETY_MANIFEST),
        ("intro.html", &intro),
        ("tools.html", TOOLS_HTML),
        ("quiz.html", QUIZ_HTML),
    ]);
    assert!(data.len() < 64 * 1024);

    let failure = import_package_with_limit(&data, &CourseMetadata::default(), 1024 * 1024).unwrap_err();
    assert_eq!(failure.errors.len(), 1);
    assert!(matches!(failure.errors[0], ImportError::UnreadableArchive { .. }));

    let outcome = import_package_with_limit(&data, &CourseMetadata::default(), 4 * 1024 * 1024).unwrap();
    assert_eq!(outcome.course.lesson_count(), 3);
}
