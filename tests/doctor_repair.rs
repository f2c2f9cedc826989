mod common;

use common::fixtures::{build_epub, write_epub, EpubOpts};
use epub_doctor::archive::{Archive, METHOD_STORED};
use epub_doctor::doctor::repair_path;
use epub_doctor::validate::validate_path;

fn has_fix(fixes: &[epub_doctor::Fix], check_id: &str) -> bool {
    fixes.iter().any(|f| f.check_id == check_id)
}

#[test]
fn repairs_mimetype_content() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            mimetype_content: "wrong/type",
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(has_fix(&outcome.fixes, "OCF-003"));
    assert!(outcome.before.has("OCF-003"));
    assert!(!outcome.after.has("OCF-003"));

    let archive = Archive::open(&output).unwrap();
    let first = &archive.entries()[0];
    assert_eq!(first.name, "mimetype");
    assert_eq!(first.method, METHOD_STORED);
    assert_eq!(first.local_extra_len, 0);
    assert_eq!(archive.read("mimetype").unwrap(), b"application/epub+zip");
}

#[test]
fn repairs_missing_modified() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            include_modified: false,
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(has_fix(&outcome.fixes, "OPF-004"));
    assert!(outcome.before.has("OPF-004"));
    assert!(!outcome.after.has("OPF-004"));
}

#[test]
fn repairs_obsolete_doctype() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            xhtml_doctype: true,
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(has_fix(&outcome.fixes, "HTM-010"));

    let archive = Archive::open(&output).unwrap();
    let chapter = archive.read("OEBPS/chapter1.xhtml").unwrap();
    let text = String::from_utf8(chapter).unwrap();
    assert!(text.contains("<!DOCTYPE html>"));
    assert!(!text.contains("XHTML"));
}

#[test]
fn repairs_missing_scripted_property() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            include_script: true,
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(has_fix(&outcome.fixes, "HTM-005"));
    assert!(!outcome.after.has("HTM-005"));

    let archive = Archive::open(&output).unwrap();
    let opf = String::from_utf8(archive.read("OEBPS/content.opf").unwrap()).unwrap();
    assert!(opf.contains(r#"properties="scripted""#));
}

#[test]
fn repairs_media_type_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            cover_media_type: Some("image/png"), // bytes are JPEG
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    let fix = outcome
        .fixes
        .iter()
        .find(|f| f.check_id == "OPF-024")
        .expect("OPF-024 fix");
    assert!(fix.description.contains("image/jpeg"));
    assert!(!outcome.after.has("MED-001"));
}

#[test]
fn valid_epub_gets_no_fixes_and_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(dir.path(), "in.epub", &build_epub(EpubOpts::default()));
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(outcome.fixes.is_empty(), "unexpected fixes: {:?}", outcome.fixes);
    assert!(outcome.before.is_valid());
    assert!(!output.exists(), "clean input must not be rewritten");
}

#[test]
fn multi_problem_output_passes_validation() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            mimetype_content: "wrong",
            include_modified: false,
            xhtml_doctype: true,
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(outcome.fixes.len() >= 3, "fixes: {:?}", outcome.fixes);

    // Independent re-validation of the written file.
    let report = validate_path(&output);
    assert_eq!(report.fatal_count(), 0);
    assert!(report.is_valid(), "findings: {:?}", report.messages());
}

#[test]
fn mimetype_reordered_first_by_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            mimetype_first: false,
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");

    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    // The fix is logged from the before-report; the writer does the work.
    assert!(has_fix(&outcome.fixes, "OCF-002"));
    assert!(!outcome.after.has("OCF-002"));

    let archive = Archive::open(&output).unwrap();
    assert_eq!(archive.entries()[0].name, "mimetype");
}

#[test]
fn repair_converges_in_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "in.epub",
        &build_epub(EpubOpts {
            mimetype_first: false,
            include_modified: false,
            include_script: true,
            ..EpubOpts::default()
        }),
    );
    let output = dir.path().join("fixed.epub");
    let outcome = repair_path(&input, Some(output.as_path())).unwrap();
    assert!(!outcome.fixes.is_empty());

    // Repairing the repaired file finds nothing left to do.
    let second = dir.path().join("fixed2.epub");
    let outcome = repair_path(&output, Some(second.as_path())).unwrap();
    assert!(outcome.fixes.is_empty(), "second pass: {:?}", outcome.fixes);
    assert!(outcome.before.is_valid());
    assert!(!second.exists());
}

#[test]
fn default_output_path_gets_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_epub(
        dir.path(),
        "book.epub",
        &build_epub(EpubOpts {
            mimetype_content: "nope",
            ..EpubOpts::default()
        }),
    );

    let outcome = repair_path(&input, None).unwrap();
    assert!(!outcome.fixes.is_empty());
    assert!(dir.path().join("book.epub.fixed.epub").exists());
}

#[test]
fn missing_input_is_a_hard_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(repair_path(dir.path().join("absent.epub"), None).is_err());
}
